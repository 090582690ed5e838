use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fs;
use std::io;
use std::path::Path;

/// Bytes escaped when a file name is placed into an href.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const STYLE: &str = r#"body {
    font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
    line-height: 1.6;
    color: #333;
    margin: 0 auto;
    max-width: 960px;
    padding: 20px;
}
h1 { border-bottom: 2px solid #3498db; padding-bottom: 8px; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 4px 12px; }
tr:nth-child(even) { background: #f5f7fa; }
a { color: #2c3e50; text-decoration: none; }
a:hover { text-decoration: underline; }
"#;

struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Renders an HTML index of `dir`, titled with the decoded request path.
pub fn render(dir: &Path, request_path: &str) -> io::Result<String> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

    let title = escape_html(request_path);
    let mut rows = String::new();

    if request_path != "/" {
        rows.push_str("<tr><td><a href=\"../\">../</a></td><td>-</td><td></td></tr>\n");
    }

    for entry in &entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let size = if entry.is_dir {
            "-".to_string()
        } else {
            entry.size.to_string()
        };
        let modified = entry
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        rows.push_str(&format!(
            "<tr><td><a href=\"{}{}\">{}{}</a></td><td>{}</td><td>{}</td></tr>\n",
            utf8_percent_encode(&entry.name, HREF),
            suffix,
            escape_html(&entry.name),
            suffix,
            size,
            modified
        ));
    }

    Ok(format!(
        "<!DOCTYPE html>
<html>
<head>
    <meta charset=\"UTF-8\">
    <title>Index of {title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <h1>Index of {title}</h1>
    <table>
        <tr><th>Name</th><th>Size</th><th>Modified</th></tr>
{rows}    </table>
</body>
</html>
"
    ))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_directories_first_with_links() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("b file.txt"), b"12345").unwrap();
        fs::create_dir(root.path().join("zdir")).unwrap();

        let html = render(root.path(), "/docs/").unwrap();

        assert!(html.contains("<title>Index of /docs/</title>"));
        assert!(html.contains("<a href=\"../\">../</a>"));
        assert!(html.contains("<a href=\"zdir/\">zdir/</a>"));
        assert!(html.contains("<a href=\"b%20file.txt\">b file.txt</a></td><td>5</td>"));
        assert!(html.find("zdir/").unwrap() < html.find("b file.txt").unwrap());
    }

    #[test]
    fn root_listing_has_no_parent_link() {
        let root = tempfile::tempdir().unwrap();
        let html = render(root.path(), "/").unwrap();
        assert!(!html.contains("href=\"../\""));
    }

    #[test]
    fn names_are_escaped() {
        assert_eq!(escape_html("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }
}
