use crate::models::EntityKind;

/// Both renderings of one notification. The plain part carries the same
/// sentences without markup.
#[derive(Debug, Clone)]
pub struct MessageBody {
    pub text: String,
    pub html: String,
}

const FOOTER: &str = "Sent by SiteKB. Notification settings are managed by your administrator.";

fn layout(heading: &str, lines: &[String], html_lines: &[String]) -> MessageBody {
    let mut text = format!("{heading}\n\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text.push_str("\n--\n");
    text.push_str(FOOTER);

    let body = html_lines
        .iter()
        .map(|l| format!("    <p>{l}</p>"))
        .collect::<Vec<_>>()
        .join("\n");
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>{heading}</h2>
{body}
    <p style="color: #666; font-size: 14px;">{FOOTER}</p>
</body>
</html>"#
    );
    MessageBody { text, html }
}

/// Minimal escaping for user-supplied text placed in HTML bodies.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn render_incident_reported(title: &str, severity: &str, reporter: &str) -> MessageBody {
    let (t, s, r) = (escape(title), escape(severity), escape(reporter));
    layout(
        "New incident reported",
        &[
            title.to_string(),
            format!("Severity: {severity}"),
            format!("Reported by {reporter}."),
        ],
        &[
            format!("<strong>{t}</strong>"),
            format!("Severity: <strong>{s}</strong>"),
            format!("Reported by {r}."),
        ],
    )
}

pub fn render_approval_requested(kind: EntityKind, title: &str, author: &str) -> MessageBody {
    let (t, a) = (escape(title), escape(author));
    layout(
        "Review requested",
        &[format!("{author} submitted the {kind} entry \"{title}\" for review.")],
        &[format!("{a} submitted the {kind} entry <strong>{t}</strong> for review.")],
    )
}

pub fn render_review_outcome(
    kind: EntityKind,
    title: &str,
    approved: bool,
    reviewer: &str,
) -> MessageBody {
    let (t, r) = (escape(title), escape(reviewer));
    let (heading, verb) = if approved {
        ("Content approved", "approved")
    } else {
        ("Content rejected", "rejected")
    };
    layout(
        heading,
        &[format!("Your {kind} entry \"{title}\" was {verb} by {reviewer}.")],
        &[format!("Your {kind} entry <strong>{t}</strong> was {verb} by {r}.")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_is_escaped_in_html_only() {
        let body = render_incident_reported("<script>alert(1)</script>", "high", "O'Brien");
        assert!(!body.html.contains("<script>"));
        assert!(body.html.contains("&lt;script&gt;"));
        assert!(body.html.contains("O&#39;Brien"));
        assert!(body.text.contains("<script>alert(1)</script>"));
        assert!(body.text.contains("Reported by O'Brien."));
    }

    #[test]
    fn review_outcome_wording() {
        let body = render_review_outcome(EntityKind::Sop, "Lockout", false, "kato");
        assert!(body.html.contains("Content rejected"));
        assert!(body.html.contains("was rejected by kato"));
        assert!(body.text.starts_with("Content rejected\n"));
    }
}
