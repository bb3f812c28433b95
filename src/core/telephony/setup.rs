//! Call-setup document generator.
//!
//! Builds the TwiML document that tells the telephony provider to open the
//! media stream back to this server, with the custom parameters the bridge
//! later reads from the `start` frame.

use super::messages::{PARAM_CALLEE, PARAM_CAMPAIGN};

/// Parameters to attach to the call setup.
#[derive(Debug, Clone, Default)]
pub struct SetupParams {
    /// Callee identity (phone number / display name)
    pub callee: Option<String>,
    /// Campaign correlation tag
    pub campaign: Option<String>,
}

/// Build the call-setup document pointing the provider at `stream_url`.
pub fn call_setup_document(stream_url: &str, params: &SetupParams) -> String {
    let mut parameters = String::new();
    if let Some(callee) = &params.callee {
        parameters.push_str(&format!(
            "\n      <Parameter name=\"{}\" value=\"{}\" />",
            PARAM_CALLEE,
            xml_escape(callee)
        ));
    }
    if let Some(campaign) = &params.campaign {
        parameters.push_str(&format!(
            "\n      <Parameter name=\"{}\" value=\"{}\" />",
            PARAM_CAMPAIGN,
            xml_escape(campaign)
        ));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n\
         \x20\x20<Connect>\n\
         \x20\x20\x20\x20<Stream url=\"{}\">{}\n\
         \x20\x20\x20\x20</Stream>\n\
         \x20\x20</Connect>\n\
         </Response>\n",
        xml_escape(stream_url),
        parameters
    )
}

/// Derive the media-stream WebSocket URL from the server's public base URL.
///
/// `https://example.com` becomes `wss://example.com/twilio-media-stream`.
pub fn stream_url(public_base: &str) -> String {
    let base = public_base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/twilio-media-stream")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_contains_stream_url_and_parameters() {
        let params = SetupParams {
            callee: Some("+15550100".to_string()),
            campaign: Some("summer-24".to_string()),
        };
        let doc = call_setup_document("wss://bridge.example.com/twilio-media-stream", &params);

        assert!(doc.contains("<Connect>"));
        assert!(doc.contains("wss://bridge.example.com/twilio-media-stream"));
        assert!(doc.contains(r#"<Parameter name="to" value="+15550100" />"#));
        assert!(doc.contains(r#"<Parameter name="campaign" value="summer-24" />"#));
    }

    #[test]
    fn test_document_without_parameters() {
        let doc = call_setup_document("wss://x.example/twilio-media-stream", &SetupParams::default());
        assert!(!doc.contains("<Parameter"));
        assert!(doc.contains("</Response>"));
    }

    #[test]
    fn test_values_are_xml_escaped() {
        let params = SetupParams {
            callee: Some(r#"Dana "D" <dana&co>"#.to_string()),
            campaign: None,
        };
        let doc = call_setup_document("wss://x.example/s", &params);
        assert!(doc.contains("Dana &quot;D&quot; &lt;dana&amp;co&gt;"));
        assert!(!doc.contains(r#"value="Dana "D""#));
    }

    #[test]
    fn test_stream_url_scheme_mapping() {
        assert_eq!(
            stream_url("https://bridge.example.com/"),
            "wss://bridge.example.com/twilio-media-stream"
        );
        assert_eq!(
            stream_url("http://localhost:3000"),
            "ws://localhost:3000/twilio-media-stream"
        );
    }
}
