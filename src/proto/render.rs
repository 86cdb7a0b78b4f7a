//! Template substitution for client document synthesis
//!
//! Templates carry `{{NAME}}` placeholders. Substitution is plain text
//! replacement; a placeholder left unresolved after all variables are
//! applied is a synthesis error, not silently passed through.

use crate::error::{VpnctlError, VpnctlResult};

/// Replace every `{{NAME}}` in `template` with its variable value
pub fn render(template: &str, vars: &[(&str, String)]) -> VpnctlResult<String> {
    let mut output = template.to_string();
    for (name, value) in vars {
        output = output.replace(&format!("{{{{{}}}}}", name), value);
    }

    if let Some(pos) = output.find("{{") {
        let tail: String = output[pos..].chars().take(24).collect();
        return Err(VpnctlError::Synthesis(format!(
            "Unresolved placeholder near '{}'",
            tail
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let out = render(
            "remote {{HOST}} {{PORT}}\n# {{HOST}}\n",
            &[("HOST", "vpn.example.com".to_string()), ("PORT", "1194".to_string())],
        )
        .expect("render failed");
        assert_eq!(out, "remote vpn.example.com 1194\n# vpn.example.com\n");
    }

    #[test]
    fn test_render_without_placeholders_is_identity() {
        let out = render("verb 3\n", &[]).expect("render failed");
        assert_eq!(out, "verb 3\n");
    }

    #[test]
    fn test_unresolved_placeholder_is_an_error() {
        let result = render("remote {{HOST}} 1194\n", &[]);
        match result {
            Err(VpnctlError::Synthesis(msg)) => assert!(msg.contains("{{HOST}}")),
            other => panic!("expected Synthesis error, got {:?}", other),
        }
    }

    #[test]
    fn test_unused_variables_are_ignored() {
        let out = render("client\n", &[("HOST", "x".to_string())]).expect("render failed");
        assert_eq!(out, "client\n");
    }
}
