//! HTML pages for the interactive documentation viewers, loaded from a CDN.

pub(crate) fn swagger_page(title: &str, spec_url: &str) -> String {
    let title = html_escape(title);
    let spec_url = html_escape(spec_url);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = () => {{
            SwaggerUIBundle({{
                url: "{spec_url}",
                dom_id: '#swagger-ui',
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIBundle.SwaggerUIStandalonePreset
                ],
                layout: "BaseLayout"
            }});
        }};
    </script>
</body>
</html>"#
    )
}

pub(crate) fn redoc_page(title: &str, spec_url: &str) -> String {
    let title = html_escape(title);
    let spec_url = html_escape(spec_url);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>body {{ margin: 0; padding: 0; }}</style>
</head>
<body>
    <redoc spec-url="{spec_url}"></redoc>
    <script src="https://cdn.redoc.ly/redoc/latest/bundles/redoc.standalone.js"></script>
</body>
</html>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_is_escaped() {
        let html = swagger_page("<script>alert(1)</script> & \"Pets\"", "/docs/openapi.json");
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; &quot;Pets&quot;"));

        let html = redoc_page("A<B", "/spec?a=1&b=\"2\"");
        assert!(html.contains("<title>A&lt;B</title>"));
        assert!(html.contains(r#"spec-url="/spec?a=1&amp;b=&quot;2&quot;""#));
    }
}
