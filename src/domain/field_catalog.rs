// ==========================================
// 受助人登记系统 - 字段目录
// ==========================================
// 职责: 逻辑字段的有序清单（键、显示标签、排序键、别名）
// 约束: 进程启动时构建一次,之后只读共享（Arc）
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

// ===== 关键字段键 =====
pub const ROW_NUMBER: &str = "row_number";
pub const NATIONAL_ID: &str = "national_id";
pub const FULL_NAME: &str = "full_name";
pub const PHONE: &str = "phone";
pub const BACKUP_PHONE: &str = "backup_phone";
pub const FAMILY_MEMBERS_COUNT: &str = "family_members_count";
pub const STATUS: &str = "status";
pub const ENTERED_AT: &str = "entered_at";
pub const UPDATED_AT: &str = "updated_at";

pub const FAMILY_MEMBER_NAME: &str = "family_member_name";
pub const FAMILY_MEMBER_RELATION: &str = "family_member_relation";
pub const FAMILY_MEMBER_NATIONAL_ID: &str = "family_member_national_id";
pub const FAMILY_MEMBER_PHONE: &str = "family_member_phone";
pub const FAMILY_MEMBER_BIRTH_DATE: &str = "family_member_birth_date";
pub const FAMILY_MEMBER_HEALTH_STATUS: &str = "family_member_health_status";
pub const FAMILY_MEMBER_EDUCATION_STATUS: &str = "family_member_education_status";
pub const FAMILY_MEMBER_NEEDS_CARE: &str = "family_member_needs_care";
pub const FAMILY_MEMBER_IS_GUARDIAN: &str = "family_member_is_guardian";
pub const FAMILY_MEMBER_NOTES: &str = "family_member_notes";

/// 家庭成员并列列（单元格内以 " | " 拼接多个成员）
pub const HOUSEHOLD_FIELDS: [&str; 10] = [
    FAMILY_MEMBER_NAME,
    FAMILY_MEMBER_RELATION,
    FAMILY_MEMBER_NATIONAL_ID,
    FAMILY_MEMBER_PHONE,
    FAMILY_MEMBER_BIRTH_DATE,
    FAMILY_MEMBER_HEALTH_STATUS,
    FAMILY_MEMBER_EDUCATION_STATUS,
    FAMILY_MEMBER_NEEDS_CARE,
    FAMILY_MEMBER_IS_GUARDIAN,
    FAMILY_MEMBER_NOTES,
];

/// 导入必需字段（自然键 + 姓名）
pub const REQUIRED_FIELDS: [&str; 2] = [NATIONAL_ID, FULL_NAME];

/// "主号码"表头（优先填充 phone）
pub const PRIMARY_PHONE_HEADER: &str = "الرقم الأساسي";

/// "备用号码"表头（phone 缺失时兜底）
pub const BACKUP_PHONE_HEADER: &str = "رقم احتياطي";

// ==========================================
// 标准字段表
// ==========================================
// (key, label, order, aliases)
const STANDARD_FIELDS: &[(&str, &str, f64, &[&str])] = &[
    (ROW_NUMBER, "رقم", 0.0, &["م.", "رقم", "الترقيم", "رقم السطر"]),
    (FULL_NAME, "الاسم الرباعي", 1.0, &["الاسم", "الاسم الرباعي", "اسم", "الاسم الكامل"]),
    (NATIONAL_ID, "رقم الهوية", 2.0, &["رقم الهوية", "الهوية", "رقم الهوية الوطنية", "هوية"]),
    (PHONE, "رقم الجوال", 3.0, &["رقم الجوال", "الجوال", "الهاتف", "الرقم الأساسي"]),
    (BACKUP_PHONE, "رقم احتياطي", 3.5, &["رقم احتياطي", "جوال احتياطي", "هاتف احتياطي"]),
    ("marital_status", "الحالة الاجتماعية", 4.0, &["الحالة الاجتماعية", "الحالة"]),
    ("spouse_name", "اسم الزوج/الزوجة", 5.0, &["اسم الزوج/الزوجة", "اسم الزوجة", "اسم الزوج", "الزوجة", "الزوج"]),
    ("spouse_phone", "جوال الزوج/الزوجة", 6.0, &["جوال الزوج/الزوجة", "جوال الزوجة", "جوال الزوج"]),
    ("spouse_national_id", "هوية الزوج/الزوجة", 7.0, &["هوية الزوج/الزوجة", "رقم هوية الزوجة", "هوية الزوجة", "هوية الزوج"]),
    ("primary_address", "عنوان السكن الحالي", 8.0, &["عنوان السكن الحالي", "العنوان الحالي", "المحل", "العنوان"]),
    ("previous_address", "عنوان السكن السابق", 9.0, &["عنوان السكن السابق", "العنوان السابق"]),
    ("region", "المنطقة", 10.0, &["المنطقة", "منطقة"]),
    ("locality", "المحلية", 11.0, &["المحلية", "محلية"]),
    ("branch", "الشعبة", 12.0, &["الشعبة", "شعبة"]),
    ("mosque", "المسجد", 13.0, &["المسجد", "مسجد"]),
    ("housing_type", "طبيعة السكن", 14.0, &["طبيعة السكن", "السكن"]),
    ("job_title", "المهنة", 15.0, &["المهنة", "الوظيفة"]),
    ("health_status", "الحالة الصحية", 16.0, &["الحالة الصحية", "الصحة"]),
    (FAMILY_MEMBERS_COUNT, "عدد أفراد الأسرة", 17.0, &["عدد أفراد الأسرة", "عدد الافراد", "عدد الأفراد"]),
    (STATUS, "الحالة", 18.0, &[]),
    ("notes", "ملاحظات", 19.0, &[]),
    (ENTERED_AT, "تاريخ الإدخال", 20.0, &[]),
    (UPDATED_AT, "تاريخ آخر تحديث", 21.0, &[]),
    (FAMILY_MEMBER_NAME, "أفراد الأسرة (الاسم)", 22.0, &[]),
    (FAMILY_MEMBER_RELATION, "أفراد الأسرة (صلة القرابة)", 23.0, &[]),
    (FAMILY_MEMBER_NATIONAL_ID, "أفراد الأسرة (رقم الهوية)", 24.0, &[]),
    (FAMILY_MEMBER_PHONE, "أفراد الأسرة (الجوال)", 25.0, &[]),
    (FAMILY_MEMBER_BIRTH_DATE, "أفراد الأسرة (تاريخ الميلاد)", 26.0, &[]),
    (FAMILY_MEMBER_HEALTH_STATUS, "أفراد الأسرة (الحالة الصحية)", 27.0, &[]),
    (FAMILY_MEMBER_EDUCATION_STATUS, "أفراد الأسرة (الحالة الدراسية)", 28.0, &["أفراد الأسرة (الحالة الدراسية)", "الحالة الدراسية"]),
    (FAMILY_MEMBER_NEEDS_CARE, "أفراد الأسرة (يحتاج رعاية)", 29.0, &[]),
    (FAMILY_MEMBER_IS_GUARDIAN, "أفراد الأسرة (يعتبر عائلاً)", 30.0, &[]),
    (FAMILY_MEMBER_NOTES, "أفراد الأسرة (ملاحظات)", 31.0, &[]),
];

/// 字段目录构建错误
#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("字段键重复: {0}")]
    DuplicateKey(String),

    #[error("字段目录为空")]
    Empty,
}

// ==========================================
// FieldDefinition - 逻辑字段定义
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    pub label: String,
    /// 仅用于显示/导出列排序,不参与身份识别
    pub order: f64,
    pub aliases: BTreeSet<String>,
}

impl FieldDefinition {
    pub fn new(key: &str, label: &str, order: f64, aliases: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            order,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// 标签精确匹配（已 trim 的表头文本）
    pub fn matches_label(&self, text: &str) -> bool {
        self.label == text
    }

    /// 别名精确匹配
    pub fn matches_alias(&self, text: &str) -> bool {
        self.aliases.contains(text)
    }

    /// 标签 ∪ 别名
    pub fn matches(&self, text: &str) -> bool {
        self.matches_label(text) || self.matches_alias(text)
    }
}

// ==========================================
// FieldCatalog - 有序字段目录
// ==========================================
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    fields: Vec<FieldDefinition>,
    index: HashMap<String, usize>,
    known_headers: HashSet<String>,
}

impl FieldCatalog {
    /// 从字段清单构建目录（保持声明顺序,该顺序即表头匹配时的搜索顺序）
    pub fn new(fields: Vec<FieldDefinition>) -> Result<Self, CatalogError> {
        if fields.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::with_capacity(fields.len());
        let mut known_headers = HashSet::new();
        for (pos, def) in fields.iter().enumerate() {
            if index.insert(def.key.clone(), pos).is_some() {
                return Err(CatalogError::DuplicateKey(def.key.clone()));
            }
            known_headers.insert(def.label.clone());
            known_headers.extend(def.aliases.iter().cloned());
        }

        Ok(Self {
            fields,
            index,
            known_headers,
        })
    }

    /// 系统标准字段目录
    pub fn standard() -> Self {
        let fields = STANDARD_FIELDS
            .iter()
            .map(|(key, label, order, aliases)| FieldDefinition::new(key, label, *order, aliases))
            .collect();

        // 标准表键唯一且非空
        match Self::new(fields) {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("标准字段目录无效: {}", e),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldDefinition> {
        self.index.get(key).map(|&pos| &self.fields[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// 按声明顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 文本是否等于任一字段的标签或别名
    pub fn is_known_header(&self, text: &str) -> bool {
        self.known_headers.contains(text)
    }

    /// 统计一行中命中标签/别名的非空单元格数
    pub fn count_header_matches<S: AsRef<str>>(&self, cells: &[S]) -> usize {
        cells
            .iter()
            .map(|c| c.as_ref().trim())
            .filter(|c| !c.is_empty() && self.is_known_header(c))
            .count()
    }

    /// 选择字段并按规范 order 排序
    ///
    /// # 说明
    /// - 未知键被忽略,重复键只保留一次
    /// - 选择为空（或全部无效）时回退为目录全部字段
    pub fn canonical_selection<S: AsRef<str>>(&self, selected: &[S]) -> Vec<&FieldDefinition> {
        let wanted: HashSet<&str> = selected
            .iter()
            .map(|s| s.as_ref())
            .filter(|k| self.contains(k))
            .collect();

        let mut defs: Vec<&FieldDefinition> = if wanted.is_empty() {
            self.fields.iter().collect()
        } else {
            self.fields
                .iter()
                .filter(|d| wanted.contains(d.key.as_str()))
                .collect()
        };

        defs.sort_by(|a, b| a.order.total_cmp(&b.order));
        defs
    }

    /// 导入选择集：空选择表示全部字段
    pub fn selection_keys<S: AsRef<str>>(&self, selected: &[S]) -> HashSet<String> {
        self.canonical_selection(selected)
            .into_iter()
            .map(|d| d.key.clone())
            .collect()
    }
}

/// 进程级共享字段目录
pub fn shared() -> Arc<FieldCatalog> {
    static CATALOG: OnceLock<Arc<FieldCatalog>> = OnceLock::new();
    CATALOG
        .get_or_init(|| Arc::new(FieldCatalog::standard()))
        .clone()
}

// ==========================================
// ColumnMap - 字段键 → 列索引（0 起）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMap {
    columns: BTreeMap<String, usize>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, column: usize) {
        self.columns.insert(key.to_string(), column);
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.columns.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// 未映射的必需字段
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|k| !self.contains(k))
            .collect()
    }
}
