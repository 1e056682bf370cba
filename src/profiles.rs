//! Bank format profiles: how to recognise one bank's export and where its
//! fields live. Profiles are plain data held by a [`ProfileRegistry`] that is
//! handed to the detector, so callers can swap or extend the set.

use serde::Serialize;

use crate::models::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bank {
    Fnb,
    StandardBank,
    Absa,
    Nedbank,
    Capitec,
    Generic,
}

impl Bank {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fnb => "FNB",
            Self::StandardBank => "Standard Bank",
            Self::Absa => "Absa",
            Self::Nedbank => "Nedbank",
            Self::Capitec => "Capitec",
            Self::Generic => "Generic",
        }
    }

    /// Lower-case fragments that identify the bank in an upload's file name.
    pub fn filename_hints(&self) -> &'static [&'static str] {
        match self {
            Self::Fnb => &["fnb", "first_national", "firstnational", "first national"],
            Self::StandardBank => &["standardbank", "standard_bank", "standard bank", "sbsa"],
            Self::Absa => &["absa"],
            Self::Nedbank => &["nedbank", "ned_bank"],
            Self::Capitec => &["capitec"],
            Self::Generic => &[],
        }
    }
}

/// Where the date, description and balance live in a CSV export.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub date: String,
    pub description: String,
    pub balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmountConvention {
    /// One column; negative is money out.
    Signed { amount: String },
    /// Separate debit/credit columns. Credit wins when populated; a debit is
    /// always booked as money out. A populated fee column is also money out.
    SplitDebitCredit {
        debit: String,
        credit: String,
        fee: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfAmountStyle {
    /// `-150.00` is money out.
    Signed,
    /// Unmarked amounts are money out; `Cr` marks money in.
    CreditSuffix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfLayout {
    /// Regex anchored at line start. Capture group 1 is the date, group 2 the
    /// rest of the line (description followed by amount and balance).
    pub row_pattern: String,
    /// Lines containing any of these end the transaction section.
    pub stop_markers: Vec<String>,
    pub amount_style: PdfAmountStyle,
    pub has_balance: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Csv {
        columns: ColumnMapping,
        amounts: AmountConvention,
    },
    PdfText(PdfLayout),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchRules {
    /// CSV header cells that must appear, in this relative order.
    pub header_signature: Vec<String>,
    /// PDF text fragments identifying the statement.
    pub text_markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BankFormatProfile {
    pub key: String,
    pub bank: Bank,
    pub display_name: String,
    pub match_rules: MatchRules,
    pub layout: Layout,
    /// chrono format tried before the shared fallbacks.
    pub date_format: String,
    pub allows_zero_amount: bool,
}

impl BankFormatProfile {
    pub fn file_type(&self) -> FileType {
        match self.layout {
            Layout::Csv { .. } => FileType::Csv,
            Layout::PdfText(_) => FileType::Pdf,
        }
    }

    pub fn is_generic_signed(&self) -> bool {
        self.bank == Bank::Generic
            && matches!(
                self.layout,
                Layout::Csv {
                    amounts: AmountConvention::Signed { .. },
                    ..
                }
            )
    }

    fn csv(
        key: &str,
        bank: Bank,
        display_name: &str,
        signature: &[&str],
        columns: ColumnMapping,
        amounts: AmountConvention,
        date_format: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            bank,
            display_name: display_name.to_string(),
            match_rules: MatchRules {
                header_signature: signature.iter().map(|s| s.to_string()).collect(),
                text_markers: Vec::new(),
            },
            layout: Layout::Csv { columns, amounts },
            date_format: date_format.to_string(),
            allows_zero_amount: false,
        }
    }

    fn pdf(
        key: &str,
        bank: Bank,
        display_name: &str,
        markers: &[&str],
        layout: PdfLayout,
        date_format: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            bank,
            display_name: display_name.to_string(),
            match_rules: MatchRules {
                header_signature: Vec::new(),
                text_markers: markers.iter().map(|s| s.to_string()).collect(),
            },
            layout: Layout::PdfText(layout),
            date_format: date_format.to_string(),
            allows_zero_amount: false,
        }
    }

    fn allowing_zero_amounts(mut self) -> Self {
        self.allows_zero_amount = true;
        self
    }
}

fn columns(date: &str, description: &str, balance: Option<&str>) -> ColumnMapping {
    ColumnMapping {
        date: date.to_string(),
        description: description.to_string(),
        balance: balance.map(str::to_string),
    }
}

fn signed(amount: &str) -> AmountConvention {
    AmountConvention::Signed {
        amount: amount.to_string(),
    }
}

fn split(debit: &str, credit: &str, fee: Option<&str>) -> AmountConvention {
    AmountConvention::SplitDebitCredit {
        debit: debit.to_string(),
        credit: credit.to_string(),
        fee: fee.map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportedBank {
    pub key: String,
    pub bank: String,
    pub display_name: String,
    pub file_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<BankFormatProfile>,
}

impl ProfileRegistry {
    pub fn new(profiles: Vec<BankFormatProfile>) -> Self {
        Self { profiles }
    }

    /// Export layouts of the major South African banks plus two generic CSV
    /// shapes.
    pub fn south_african() -> Self {
        let profiles = vec![
            BankFormatProfile::csv(
                "fnb_csv",
                Bank::Fnb,
                "FNB CSV export",
                &["Date", "Amount", "Balance", "Description"],
                columns("Date", "Description", Some("Balance")),
                signed("Amount"),
                "%Y/%m/%d",
            )
            .allowing_zero_amounts(),
            BankFormatProfile::csv(
                "standard_bank_csv",
                Bank::StandardBank,
                "Standard Bank CSV export",
                &["Date", "Description", "Amount", "Balance"],
                columns("Date", "Description", Some("Balance")),
                signed("Amount"),
                "%Y-%m-%d",
            ),
            BankFormatProfile::csv(
                "absa_csv",
                Bank::Absa,
                "Absa CSV export",
                &["Date", "Description", "Amount", "Balance"],
                columns("Date", "Description", Some("Balance")),
                signed("Amount"),
                "%d/%m/%Y",
            ),
            BankFormatProfile::csv(
                "nedbank_csv",
                Bank::Nedbank,
                "Nedbank CSV export",
                &["Date", "Description", "Debit", "Credit", "Balance"],
                columns("Date", "Description", Some("Balance")),
                split("Debit", "Credit", None),
                "%d/%m/%Y",
            ),
            BankFormatProfile::csv(
                "capitec_csv",
                Bank::Capitec,
                "Capitec CSV export",
                &["Transaction Date", "Description", "Money In", "Money Out", "Balance"],
                columns("Transaction Date", "Description", Some("Balance")),
                split("Money Out", "Money In", Some("Fee")),
                "%Y-%m-%d",
            ),
            BankFormatProfile::csv(
                "generic_split_csv",
                Bank::Generic,
                "Generic CSV (Date, Description, Debit, Credit)",
                &["Date", "Description", "Debit", "Credit"],
                columns("Date", "Description", None),
                split("Debit", "Credit", None),
                "%d/%m/%Y",
            ),
            BankFormatProfile::csv(
                "generic_signed_csv",
                Bank::Generic,
                "Generic CSV (Date, Description, Amount)",
                &["Date", "Description", "Amount"],
                columns("Date", "Description", Some("Balance")),
                signed("Amount"),
                "%d/%m/%Y",
            ),
            BankFormatProfile::pdf(
                "fnb_pdf",
                Bank::Fnb,
                "FNB PDF statement",
                &["First National Bank", "FNB"],
                PdfLayout {
                    row_pattern: r"^\s*(\d{1,2} [A-Za-z]{3} \d{4})\s+(.*)$".to_string(),
                    stop_markers: vec!["Closing Balance".to_string(), "Turnover for Statement Period".to_string()],
                    amount_style: PdfAmountStyle::CreditSuffix,
                    has_balance: true,
                },
                "%d %b %Y",
            )
            .allowing_zero_amounts(),
            BankFormatProfile::pdf(
                "standard_bank_pdf",
                Bank::StandardBank,
                "Standard Bank PDF statement",
                &["Standard Bank", "The Standard Bank of South Africa"],
                PdfLayout {
                    row_pattern: r"^\s*(\d{2}/\d{2}/\d{4})\s+(.*)$".to_string(),
                    stop_markers: vec!["Closing Balance".to_string()],
                    amount_style: PdfAmountStyle::Signed,
                    has_balance: true,
                },
                "%d/%m/%Y",
            ),
        ];
        Self::new(profiles)
    }

    /// Add a profile, e.g. a tenant-specific export layout.
    #[cfg(test)]
    pub fn register(&mut self, profile: BankFormatProfile) {
        self.profiles.retain(|p| p.key != profile.key);
        self.profiles.push(profile);
    }

    pub fn profiles(&self) -> &[BankFormatProfile] {
        &self.profiles
    }

    pub fn get(&self, key: &str) -> Option<&BankFormatProfile> {
        self.profiles.iter().find(|p| p.key == key)
    }

    pub fn supported(&self) -> Vec<SupportedBank> {
        self.profiles
            .iter()
            .map(|p| SupportedBank {
                key: p.key.clone(),
                bank: p.bank.name().to_string(),
                display_name: p.display_name.clone(),
                file_type: p.file_type().as_str(),
            })
            .collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::south_african()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_csv_and_pdf() {
        let registry = ProfileRegistry::default();
        let supported = registry.supported();
        assert!(supported.iter().any(|s| s.file_type == "csv"));
        assert!(supported.iter().any(|s| s.file_type == "pdf"));
        assert!(registry.get("generic_signed_csv").unwrap().is_generic_signed());
        assert!(!registry.get("generic_split_csv").unwrap().is_generic_signed());
    }

    #[test]
    fn test_profile_keys_are_unique() {
        let registry = ProfileRegistry::default();
        let mut keys: Vec<&str> = registry.profiles().iter().map(|p| p.key.as_str()).collect();
        let before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn test_register_replaces_same_key() {
        let mut registry = ProfileRegistry::new(Vec::new());
        let mut profile = ProfileRegistry::south_african().get("absa_csv").unwrap().clone();
        registry.register(profile.clone());
        profile.date_format = "%Y%m%d".to_string();
        registry.register(profile);
        assert_eq!(registry.profiles().len(), 1);
        assert_eq!(registry.get("absa_csv").unwrap().date_format, "%Y%m%d");
    }
}
