// ==========================================
// 受助人登记系统 - 档案领域模型
// ==========================================
// 自然键: national_id（仅数字,6-20 位）
// 家庭成员: 归属唯一档案,导入/编辑时整体替换
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// IdentityFields - 档案可编辑字段
// ==========================================
// 字段键与 FieldCatalog 中的键一一对应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityFields {
    // ===== 联系方式 =====
    pub phone: Option<String>,
    pub backup_phone: Option<String>,

    // ===== 婚姻/配偶 =====
    pub marital_status: Option<String>,
    pub spouse_name: Option<String>,
    pub spouse_phone: Option<String>,
    pub spouse_national_id: Option<String>,

    // ===== 地址/区域 =====
    pub primary_address: Option<String>,
    pub previous_address: Option<String>,
    pub region: Option<String>,
    pub locality: Option<String>,
    pub branch: Option<String>,
    pub mosque: Option<String>,
    pub housing_type: Option<String>,

    // ===== 其他 =====
    pub job_title: Option<String>,
    pub health_status: Option<String>,
    pub notes: Option<String>,
}

impl IdentityFields {
    /// 可通过字段键读写的列（顺序即持久化列顺序）
    pub const KEYS: [&'static str; 16] = [
        "phone",
        "backup_phone",
        "marital_status",
        "spouse_name",
        "spouse_phone",
        "spouse_national_id",
        "primary_address",
        "previous_address",
        "region",
        "locality",
        "branch",
        "mosque",
        "housing_type",
        "job_title",
        "health_status",
        "notes",
    ];

    fn slot(&self, key: &str) -> Option<&Option<String>> {
        let slot = match key {
            "phone" => &self.phone,
            "backup_phone" => &self.backup_phone,
            "marital_status" => &self.marital_status,
            "spouse_name" => &self.spouse_name,
            "spouse_phone" => &self.spouse_phone,
            "spouse_national_id" => &self.spouse_national_id,
            "primary_address" => &self.primary_address,
            "previous_address" => &self.previous_address,
            "region" => &self.region,
            "locality" => &self.locality,
            "branch" => &self.branch,
            "mosque" => &self.mosque,
            "housing_type" => &self.housing_type,
            "job_title" => &self.job_title,
            "health_status" => &self.health_status,
            "notes" => &self.notes,
            _ => return None,
        };
        Some(slot)
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        let slot = match key {
            "phone" => &mut self.phone,
            "backup_phone" => &mut self.backup_phone,
            "marital_status" => &mut self.marital_status,
            "spouse_name" => &mut self.spouse_name,
            "spouse_phone" => &mut self.spouse_phone,
            "spouse_national_id" => &mut self.spouse_national_id,
            "primary_address" => &mut self.primary_address,
            "previous_address" => &mut self.previous_address,
            "region" => &mut self.region,
            "locality" => &mut self.locality,
            "branch" => &mut self.branch,
            "mosque" => &mut self.mosque,
            "housing_type" => &mut self.housing_type,
            "job_title" => &mut self.job_title,
            "health_status" => &mut self.health_status,
            "notes" => &mut self.notes,
            _ => return None,
        };
        Some(slot)
    }

    /// 按字段键读取
    pub fn get(&self, key: &str) -> Option<&str> {
        self.slot(key).and_then(|v| v.as_deref())
    }

    /// 按字段键写入；空白值写为 None
    ///
    /// # 返回
    /// - true: 键属于可编辑字段
    /// - false: 未知键（忽略）
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        match self.slot_mut(key) {
            Some(slot) => {
                let trimmed = value.trim();
                *slot = if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                };
                true
            }
            None => false,
        }
    }

    pub fn is_field(key: &str) -> bool {
        Self::KEYS.contains(&key)
    }
}

// ==========================================
// IdentityRecord - 受助人档案
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    // ===== 主键 =====
    pub id: i64,
    pub national_id: String, // 自然键（唯一）

    // ===== 基础信息 =====
    pub full_name: String,
    pub fields: IdentityFields,
    pub family_members_count: i64,

    // ===== 审核 =====
    pub needs_review: bool, // 自助登记 = true,管理员导入/编辑 = false

    // ===== 审计字段 =====
    pub entered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    /// 审核状态显示文本
    pub fn status_label(&self) -> &'static str {
        if self.needs_review {
            "بانتظار المراجعة"
        } else {
            "موثق"
        }
    }
}

/// 国家身份证号规范化：去除全部非数字字符
pub fn normalize_national_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 自然键格式校验（6-20 位数字）
pub fn is_valid_national_id(value: &str) -> bool {
    (6..=20).contains(&value.len()) && value.chars().all(|c| c.is_ascii_digit())
}

// ==========================================
// Relation - 家庭成员关系
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Wife,
    Husband,
    Son,
    Daughter,
    /// "أخرى" 或任意未登记的关系文本（导入不因关系文本拒绝行）
    Other(String),
}

pub const RELATION_OTHER_LABEL: &str = "أخرى";

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Relation::Wife => "زوجة",
            Relation::Husband => "زوج",
            Relation::Son => "ابن",
            Relation::Daughter => "ابنة",
            Relation::Other(text) if text.is_empty() => RELATION_OTHER_LABEL,
            Relation::Other(text) => text,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "زوجة" => Relation::Wife,
            "زوج" => Relation::Husband,
            "ابن" => Relation::Son,
            "ابنة" => Relation::Daughter,
            other => Relation::Other(other.to_string()),
        }
    }
}

impl Default for Relation {
    fn default() -> Self {
        Relation::Other(RELATION_OTHER_LABEL.to_string())
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// HouseholdMember - 家庭成员
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HouseholdMember {
    pub member_name: String,
    pub relation: Relation,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub is_guardian: bool,
    pub needs_care: bool,
    pub health_status: Option<String>,
    pub education_status: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_set_and_get() {
        let mut fields = IdentityFields::default();
        assert!(fields.set("region", "  الخرطوم "));
        assert_eq!(fields.get("region"), Some("الخرطوم"));

        assert!(fields.set("region", "   "));
        assert_eq!(fields.get("region"), None);

        assert!(!fields.set("full_name", "x"));
        assert_eq!(fields.get("unknown"), None);
    }

    #[test]
    fn test_normalize_national_id() {
        assert_eq!(normalize_national_id(" 123-456 789 "), "123456789");
        assert_eq!(normalize_national_id("abc"), "");
        assert!(is_valid_national_id("123456"));
        assert!(!is_valid_national_id("12345"));
    }

    #[test]
    fn test_relation_parse_keeps_unknown_text() {
        assert_eq!(Relation::parse("ابنة"), Relation::Daughter);
        assert_eq!(Relation::parse("أخرى").as_str(), "أخرى");
        assert_eq!(Relation::parse("حفيد"), Relation::Other("حفيد".to_string()));
        assert_eq!(Relation::parse("حفيد").as_str(), "حفيد");
    }
}
