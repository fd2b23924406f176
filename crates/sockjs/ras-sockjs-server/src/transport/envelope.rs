//! Per-transport wire envelopes around encoded frames

use ras_sockjs_types::{Frame, quote};

const HTMLFILE_TEMPLATE: &str = r#"<!doctype html>
<html><head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
</head><body><h2>Don't panic!</h2>
  <script>
    document.domain = document.domain;
    var c = parent.{{ callback }};
    c.start();
    function p(d) {c.message(d);};
    window.onload = function() {c.stop();};
  </script>
"#;

/// How a receiving transport wraps frames on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Envelope {
    Xhr,
    XhrStreaming,
    EventSource,
    HtmlFile { callback: String },
    Jsonp { callback: String },
}

impl Envelope {
    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            Envelope::Xhr | Envelope::XhrStreaming | Envelope::Jsonp { .. } => {
                "application/javascript; charset=UTF-8"
            }
            Envelope::EventSource => "text/event-stream; charset=UTF-8",
            Envelope::HtmlFile { .. } => "text/html; charset=UTF-8",
        }
    }

    /// Bytes written once before the first frame of a response
    pub(crate) fn prelude(&self) -> Option<String> {
        match self {
            Envelope::Xhr | Envelope::Jsonp { .. } => None,
            // Defeats buffering in some browsers until 2KiB arrived
            Envelope::XhrStreaming => Some(format!("{}\n", "h".repeat(2048))),
            Envelope::EventSource => Some("\r\n".to_string()),
            Envelope::HtmlFile { callback } => {
                let mut page = HTMLFILE_TEMPLATE.replace("{{ callback }}", callback);
                if page.len() < 1024 {
                    page.push_str(&" ".repeat(1024 - page.len()));
                }
                page.push_str("\r\n");
                Some(page)
            }
        }
    }

    pub(crate) fn wrap(&self, frame: &Frame) -> String {
        let encoded = frame.encode();
        match self {
            Envelope::Xhr | Envelope::XhrStreaming => format!("{}\n", encoded),
            Envelope::EventSource => format!("data: {}\r\n\r\n", encoded),
            Envelope::HtmlFile { .. } => {
                format!("<script>\np({});\n</script>\r\n", quote(&encoded))
            }
            Envelope::Jsonp { callback } => format!("/**/{}({});\r\n", callback, quote(&encoded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_sockjs_types::CloseFrame;

    #[test]
    fn test_frame_wrapping() {
        let frame = Frame::Messages(vec!["x".to_string()]);
        assert_eq!(Envelope::Xhr.wrap(&frame), "a[\"x\"]\n");
        assert_eq!(Envelope::EventSource.wrap(&Frame::Open), "data: o\r\n\r\n");
        assert_eq!(
            Envelope::Jsonp {
                callback: "cb".to_string()
            }
            .wrap(&Frame::Open),
            "/**/cb(\"o\");\r\n"
        );
        assert_eq!(
            Envelope::HtmlFile {
                callback: "cb".to_string()
            }
            .wrap(&Frame::Close(CloseFrame::go_away())),
            "<script>\np(\"c[3000,\\\"Go away!\\\"]\");\n</script>\r\n"
        );
    }

    #[test]
    fn test_preludes() {
        let prelude = Envelope::XhrStreaming.prelude().unwrap();
        assert_eq!(prelude.len(), 2049);
        assert!(prelude.ends_with("h\n"));

        let page = Envelope::HtmlFile {
            callback: "parent_cb".to_string(),
        }
        .prelude()
        .unwrap();
        assert!(page.len() >= 1024 + 2);
        assert!(page.contains("var c = parent.parent_cb;"));
        assert!(page.ends_with("\r\n"));

        assert!(Envelope::Xhr.prelude().is_none());
    }
}
