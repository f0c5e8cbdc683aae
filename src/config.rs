use crate::error::Error;
use crate::models::CompanyInfo;
use regex::Regex;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = ".config/invoicer.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_workbook")]
    pub workbook: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Optional PNG placed above the signatory. A missing file is fine.
    #[serde(default)]
    pub signature: Option<PathBuf>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payment_term_days")]
    pub payment_term_days: u32,
    #[serde(default = "default_slip_dpi")]
    pub slip_dpi: u32,
    #[serde(default)]
    pub sheets: SheetNames,
    pub company: CompanyInfo,
}

fn default_workbook() -> PathBuf {
    PathBuf::from("Beispieldaten.xlsx")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Rechnungen")
}

fn default_currency() -> String {
    "CHF".to_string()
}

fn default_payment_term_days() -> u32 {
    20
}

fn default_slip_dpi() -> u32 {
    150
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetNames {
    #[serde(default = "default_customers_sheet")]
    pub customers: String,
    #[serde(default = "default_work_items_sheet")]
    pub work_items: String,
}

fn default_customers_sheet() -> String {
    "Kunden".to_string()
}

fn default_work_items_sheet() -> String {
    "Positionen".to_string()
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            customers: default_customers_sheet(),
            work_items: default_work_items_sheet(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything the QR-bill and the layout rely on, so a bad
    /// config fails before the first invoice instead of on every one.
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.currency.as_str(), "CHF" | "EUR") {
            return Err(Error::InvalidConfig(format!(
                "currency must be CHF or EUR, got `{}`",
                self.currency
            )));
        }
        if self.payment_term_days == 0 {
            return Err(Error::InvalidConfig(
                "payment_term_days must be at least 1".to_string(),
            ));
        }
        if !(72..=600).contains(&self.slip_dpi) {
            return Err(Error::InvalidConfig(format!(
                "slip_dpi must be between 72 and 600, got {}",
                self.slip_dpi
            )));
        }
        if self.company.name.trim().is_empty() {
            return Err(Error::InvalidConfig("company.name is empty".to_string()));
        }
        let iban = self.company.compact_iban();
        validate_iban(&iban)?;
        if is_qr_iban(&iban) {
            return Err(Error::InvalidConfig(format!(
                "`{iban}` is a QR-IBAN, which needs a QR reference; use the regular account IBAN"
            )));
        }
        Ok(())
    }
}

/// QR-IBANs carry an institution id in 30000..=31999 and are only valid
/// together with a `QRR` reference.
pub fn is_qr_iban(iban: &str) -> bool {
    iban.get(4..9)
        .and_then(|iid| iid.parse::<u32>().ok())
        .is_some_and(|iid| (30000..=31999).contains(&iid))
}

/// Accepts Swiss and Liechtenstein IBANs only, which is all a QR-bill takes.
pub fn validate_iban(iban: &str) -> Result<(), Error> {
    let shape = Regex::new(r"^(CH|LI)\d{2}[0-9A-Z]{17}$")
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    if !shape.is_match(iban) {
        return Err(Error::InvalidConfig(format!(
            "`{iban}` is not a CH/LI IBAN"
        )));
    }

    // ISO 7064 mod 97-10: move the first four characters to the end,
    // letters become 10..35, the remainder must be 1.
    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut remainder: u32 = 0;
    for c in rearranged {
        let Some(value) = c.to_digit(36) else {
            return Err(Error::InvalidConfig(format!("`{iban}` contains `{c}`")));
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    if remainder != 1 {
        return Err(Error::InvalidConfig(format!(
            "`{iban}` has an invalid checksum"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[company]
name = "Muster GmbH"
street = "Bahnhofstrasse 1"
postal_code = "8000"
city = "Zürich"
iban = "CH93 0076 2011 6238 5295 7"
"#;

    #[test]
    fn defaults_match_the_classic_layout() {
        let config = Config::from_toml(MINIMAL).expect("minimal config");
        assert_eq!(config.currency, "CHF");
        assert_eq!(config.payment_term_days, 20);
        assert_eq!(config.slip_dpi, 150);
        assert_eq!(config.sheets.customers, "Kunden");
        assert_eq!(config.sheets.work_items, "Positionen");
        assert_eq!(config.company.country, "CH");
        assert_eq!(config.output_dir, PathBuf::from("Rechnungen"));
        assert!(config.signature.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let toml = format!(
            "currency = \"EUR\"\npayment_term_days = 30\nsignature = \"sig.png\"\n\n[sheets]\ncustomers = \"Customers\"\n{MINIMAL}"
        );
        let config = Config::from_toml(&toml).expect("config with overrides");
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.payment_term_days, 30);
        assert_eq!(config.signature, Some(PathBuf::from("sig.png")));
        assert_eq!(config.sheets.customers, "Customers");
        assert_eq!(config.sheets.work_items, "Positionen");
    }

    #[test]
    fn missing_company_is_a_parse_error() {
        let result = Config::from_toml("currency = \"CHF\"\n");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn rejects_unsupported_currency() {
        let toml = format!("currency = \"USD\"\n{MINIMAL}");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn iban_checksum() {
        assert!(validate_iban("CH9300762011623852957").is_ok());
        assert!(validate_iban("CH5604835012345678009").is_ok());
        assert!(validate_iban("CH9300762011623852958").is_err());
        assert!(validate_iban("DE89370400440532013000").is_err());
        assert!(validate_iban("CH93 0076").is_err());
    }

    #[test]
    fn rejects_qr_iban_as_company_account() {
        assert!(validate_iban("CH4431999123000889012").is_ok());
        assert!(is_qr_iban("CH4431999123000889012"));
        assert!(!is_qr_iban("CH9300762011623852957"));

        let toml = MINIMAL.replace("CH93 0076 2011 6238 5295 7", "CH44 3199 9123 0008 8901 2");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(Error::InvalidConfig(msg)) if msg.contains("QR-IBAN")
        ));
    }
}
