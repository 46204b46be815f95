// Input validation for CLI arguments. All checks run before any mutation.

use crate::error::{Error, Result};

pub struct InputValidator;

impl InputValidator {
    /// Validate a container or network-prefix name. Names become path
    /// components and interface-name prefixes, so they are restricted to
    /// alphanumerics, dash and underscore, starting with a letter.
    pub fn validate_name(kind: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Validation(format!("{} name must not be empty", kind)));
        }
        if name.len() > 32 {
            return Err(Error::Validation(format!(
                "{} name '{}' is too long (max 32 characters)",
                kind, name
            )));
        }
        if !name.chars().next().unwrap().is_ascii_alphabetic() {
            return Err(Error::Validation(format!(
                "{} name '{}' must start with a letter",
                kind, name
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(format!(
                "{} name '{}' contains invalid characters",
                kind, name
            )));
        }
        Ok(())
    }

    /// Kernel interface names are capped at IFNAMSIZ-1 (15) bytes.
    pub fn validate_interface_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 15 {
            return Err(Error::Validation(format!(
                "interface name '{}' must be 1-15 characters",
                name
            )));
        }
        if name.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(Error::Validation(format!(
                "interface name '{}' contains invalid characters",
                name
            )));
        }
        Ok(())
    }

    /// Validate a MAC address string (six colon-separated octets).
    #[allow(dead_code)]
    pub fn validate_mac(mac: &str) -> Result<()> {
        let octets: Vec<&str> = mac.split(':').collect();
        if octets.len() != 6
            || octets
                .iter()
                .any(|o| o.len() != 2 || u8::from_str_radix(o, 16).is_err())
        {
            return Err(Error::Validation(format!("invalid MAC address '{}'", mac)));
        }
        Ok(())
    }

    /// The network size bounds from the CLI surface: at least one
    /// container, and small enough to fit a /16 block.
    pub fn validate_network_size(size: u32) -> Result<()> {
        if size == 0 {
            return Err(Error::Validation(
                "network size must be greater than zero".to_string(),
            ));
        }
        if size > 65_533 {
            return Err(Error::Validation(
                "network size must be less than 65534".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_names() {
        InputValidator::validate_name("container", "web-1").unwrap();
        InputValidator::validate_name("bridge", "labbr").unwrap();
    }

    #[test]
    fn rejects_bad_names() {
        assert!(InputValidator::validate_name("container", "").is_err());
        assert!(InputValidator::validate_name("container", "1abc").is_err());
        assert!(InputValidator::validate_name("container", "a/b").is_err());
        assert!(InputValidator::validate_name("container", &"x".repeat(40)).is_err());
    }

    #[test]
    fn interface_names_bounded_by_ifnamsiz() {
        InputValidator::validate_interface_name("h1-eth0").unwrap();
        assert!(InputValidator::validate_interface_name("verylongname-eth10").is_err());
    }

    #[test]
    fn mac_validation() {
        InputValidator::validate_mac("02:00:00:ab:cd:ef").unwrap();
        assert!(InputValidator::validate_mac("02:00:00:ab:cd").is_err());
        assert!(InputValidator::validate_mac("02:00:00:ab:cd:zz").is_err());
    }

    #[test]
    fn network_size_bounds() {
        assert!(InputValidator::validate_network_size(0).is_err());
        InputValidator::validate_network_size(3).unwrap();
        assert!(InputValidator::validate_network_size(70_000).is_err());
    }
}
