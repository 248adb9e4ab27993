//! The single HTML page: input form, optional result, optional image echo.

pub use facecheck_core::Verdict;
use std::fmt::Write;

/// Template parameters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Page {
    pub result: Option<Verdict>,
    pub image1_url: Option<String>,
    pub image2_url: Option<String>,
}

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Face Match</title>
<style>
body { font-family: sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; }
label { display: block; margin-top: 0.75rem; }
input[type=text] { width: 100%; }
.images { display: flex; gap: 1rem; margin-top: 1rem; }
.images img { max-width: 48%; max-height: 24rem; object-fit: contain; }
</style>
</head>
<body>
<h1>Face Match</h1>
<form method="post" action="/">
<label for="url1">Image URL 1</label>
<input type="text" id="url1" name="url1" required>
<label for="url2">Image URL 2</label>
<input type="text" id="url2" name="url2" required>
<p><button type="submit">Compare</button></p>
</form>
"#;

const TAIL: &str = "</body>\n</html>\n";

/// Render the page. All interpolated values are HTML-escaped.
pub fn render(page: &Page) -> String {
    let mut html = String::from(HEAD);

    if let Some(verdict) = page.result {
        let _ = writeln!(html, "<h2 id=\"result\">{}</h2>", escape(verdict.message()));
    }

    let images: Vec<&str> = [&page.image1_url, &page.image2_url]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    if !images.is_empty() {
        html.push_str("<div class=\"images\">\n");
        for (i, url) in images.iter().enumerate() {
            let _ = writeln!(html, "<img src=\"{}\" alt=\"Image {}\">", escape(url), i + 1);
        }
        html.push_str("</div>\n");
    }

    html.push_str(TAIL);
    html
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_has_form_only() {
        let html = render(&Page::default());
        assert!(html.contains(r#"name="url1""#));
        assert!(html.contains(r#"name="url2""#));
        assert!(!html.contains("id=\"result\""));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn test_result_and_images() {
        let html = render(&Page {
            result: Some(Verdict::Match),
            image1_url: Some("https://example.com/a.jpg".into()),
            image2_url: Some("data:image/png;base64,iVBO+/w==".into()),
        });
        assert!(html.contains("<h2 id=\"result\">Faces Match</h2>"));
        assert!(html.contains(r#"<img src="https://example.com/a.jpg" alt="Image 1">"#));
        assert!(html.contains(r#"<img src="data:image/png;base64,iVBO+/w==" alt="Image 2">"#));
    }

    #[test]
    fn test_failure_without_images() {
        let html = render(&Page {
            result: Some(Verdict::FetchFailure),
            ..Page::default()
        });
        assert!(html.contains(Verdict::FetchFailure.message()));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn test_urls_are_escaped() {
        let html = render(&Page {
            result: Some(Verdict::NoMatch),
            image1_url: Some(r#"https://x.test/a.jpg"><script>alert(1)</script>"#.into()),
            image2_url: Some("https://x.test/b.jpg?a=1&b=2".into()),
        });
        assert!(!html.contains("<script>"));
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
        assert!(html.contains("a=1&amp;b=2"));
    }
}
