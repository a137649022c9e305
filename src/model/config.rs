use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Patch, Record, RecordMeta};
use crate::schema::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    General,
    Legal,
    Both,
}

impl Applicability {
    pub fn as_str(self) -> &'static str {
        match self {
            Applicability::General => "general",
            Applicability::Legal => "legal",
            Applicability::Both => "both",
        }
    }

    pub fn covers(self, kind: BusinessKind) -> bool {
        match self {
            Applicability::Both => true,
            Applicability::General => kind == BusinessKind::General,
            Applicability::Legal => kind == BusinessKind::Legal,
        }
    }
}

fn default_both() -> Applicability {
    Applicability::Both
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCategory {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    #[serde(default = "default_both")]
    pub applicability: Applicability,
    /// Seeded catalogue rows carry true; user-created rows false.
    #[serde(default)]
    pub is_default: bool,
}

impl Record for ExpenseCategory {
    const COLLECTION: Collection = Collection::ExpenseCategories;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpenseCategoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicability: Option<Applicability>,
}

impl Patch for ExpenseCategoryPatch {
    type Record = ExpenseCategory;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessKind {
    General,
    Legal,
}

impl BusinessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BusinessKind::General => "general",
            BusinessKind::Legal => "legal",
        }
    }
}

fn default_general() -> BusinessKind {
    BusinessKind::General
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_date_format() -> String {
    "YYYY-MM-DD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessPreferences {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default)]
    pub default_tax_rate_bps: i64,
}

impl Default for BusinessPreferences {
    fn default() -> Self {
        BusinessPreferences {
            currency: default_currency(),
            date_format: default_date_format(),
            dark_mode: false,
            default_tax_rate_bps: 0,
        }
    }
}

/// Singleton business profile. `setup_complete` and `onboarded_at` are
/// owned by the onboarding flow and deliberately absent from the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub business_name: String,
    #[serde(default = "default_general")]
    pub business_kind: BusinessKind,
    #[serde(default)]
    pub setup_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarded_at: Option<i64>,
    #[serde(default)]
    pub preferences: BusinessPreferences,
}

impl Record for BusinessConfig {
    const COLLECTION: Collection = Collection::BusinessConfig;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BusinessConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_kind: Option<BusinessKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<BusinessPreferences>,
}

impl Patch for BusinessConfigPatch {
    type Record = BusinessConfig;
}

/// Free-form key/value pair for anything without a dedicated collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub key: String,
    pub value: Value,
}

impl Record for Setting {
    const COLLECTION: Collection = Collection::Settings;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch for SettingPatch {
    type Record = Setting;
}
