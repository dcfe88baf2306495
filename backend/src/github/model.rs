use eyre::Result;

/// Helper struct for webhook processing
pub struct WebhookProcessor;

impl WebhookProcessor {
    /// Verify webhook signature
    pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> Result<()> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let signature = signature
            .strip_prefix("sha256=")
            .ok_or(eyre::eyre!("Invalid signature format"))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
        mac.update(body);

        let signature_bytes = hex::decode(signature)?;
        let signature_array =
            hmac::digest::Output::<Sha256>::from_slice(&signature_bytes).to_owned();

        // Use constant-time comparison from hmac crate
        use hmac::digest::CtOutput;
        if mac.finalize() == CtOutput::new(signature_array) {
            Ok(())
        } else {
            Err(eyre::eyre!("Invalid signature"))
        }
    }
}

/// Extract the instruction text that follows the trigger phrase in a comment
/// body. `None` means the phrase is absent; an empty string means the phrase
/// was mentioned bare, which callers treat as "use the issue text instead".
pub fn extract_instruction(body: &str, trigger_phrase: &str) -> Option<String> {
    let start = body.find(trigger_phrase)?;
    let remainder = &body[start + trigger_phrase.len()..];
    Some(remainder.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_passes() {
        let body = br#"{"action":"created"}"#;
        let signature = sign(body, "webhook-secret");
        assert!(WebhookProcessor::verify_webhook_signature(body, &signature, "webhook-secret").is_ok());
    }

    #[test]
    fn test_tampered_body_fails() {
        let signature = sign(br#"{"action":"created"}"#, "webhook-secret");
        assert!(
            WebhookProcessor::verify_webhook_signature(
                br#"{"action":"deleted"}"#,
                &signature,
                "webhook-secret"
            )
            .is_err()
        );
    }

    #[test]
    fn test_wrong_secret_fails() {
        let body = br#"{"action":"created"}"#;
        let signature = sign(body, "webhook-secret");
        assert!(WebhookProcessor::verify_webhook_signature(body, &signature, "other-secret").is_err());
    }

    #[test]
    fn test_missing_prefix_rejected() {
        assert!(WebhookProcessor::verify_webhook_signature(b"{}", "deadbeef", "s").is_err());
    }

    #[test]
    fn test_extract_instruction() {
        assert_eq!(
            extract_instruction("@patchpilot fix the login timeout", "@patchpilot"),
            Some("fix the login timeout".to_string())
        );
        assert_eq!(
            extract_instruction("please look into this", "@patchpilot"),
            None
        );
        // Bare mention yields an empty instruction.
        assert_eq!(
            extract_instruction("cc @patchpilot", "@patchpilot"),
            Some(String::new())
        );
        // Text before the phrase is ignored, text after is kept verbatim.
        assert_eq!(
            extract_instruction(
                "as discussed: @patchpilot handle nulls in UserService\nthanks",
                "@patchpilot"
            ),
            Some("handle nulls in UserService\nthanks".to_string())
        );
    }
}
