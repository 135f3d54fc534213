// ==========================================
// 受助人登记系统 - 导出行渲染
// ==========================================
// 派生列:
// - row_number: 导出顺序（1 起）
// - status: 审核状态文本
// - entered_at / updated_at: %Y-%m-%d %H:%M:%S
// - family_members_count: 档案内嵌计数
// - family_member_*: 家庭成员并列列
// ==========================================

use crate::domain::field_catalog::{
    FieldCatalog, FieldDefinition, ENTERED_AT, FAMILY_MEMBERS_COUNT, FULL_NAME, HOUSEHOLD_FIELDS,
    NATIONAL_ID, ROW_NUMBER, STATUS, UPDATED_AT,
};
use crate::domain::identity::{HouseholdMember, IdentityRecord};
use crate::importer::household::encode_members;
use chrono::{DateTime, Utc};

const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 按选定列渲染导出行
#[derive(Debug, Clone)]
pub struct RowRenderer {
    keys: Vec<String>,
    labels: Vec<String>,
    with_household: bool,
}

impl RowRenderer {
    /// 按字段选择构建渲染器（列顺序为目录排序）
    pub fn new<S: AsRef<str>>(catalog: &FieldCatalog, selected_fields: &[S]) -> Self {
        let columns: Vec<&FieldDefinition> = catalog.canonical_selection(selected_fields);
        let keys: Vec<String> = columns.iter().map(|def| def.key.clone()).collect();
        let with_household = keys.iter().any(|k| HOUSEHOLD_FIELDS.contains(&k.as_str()));

        Self {
            labels: columns.iter().map(|def| def.label.clone()).collect(),
            keys,
            with_household,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn header_labels(&self) -> &[String] {
        &self.labels
    }

    /// 是否需要加载家庭成员
    pub fn needs_household(&self) -> bool {
        self.with_household
    }

    /// 渲染一行
    ///
    /// # 参数
    /// - row_number: 导出顺序（1 起）
    pub fn render(
        &self,
        row_number: usize,
        record: &IdentityRecord,
        members: &[HouseholdMember],
    ) -> Vec<String> {
        let mut household = if self.with_household {
            encode_members(members)
        } else {
            Default::default()
        };

        self.keys
            .iter()
            .map(|key| match key.as_str() {
                ROW_NUMBER => row_number.to_string(),
                NATIONAL_ID => record.national_id.clone(),
                FULL_NAME => record.full_name.clone(),
                FAMILY_MEMBERS_COUNT => record.family_members_count.to_string(),
                STATUS => record.status_label().to_string(),
                ENTERED_AT => display_time(&record.entered_at),
                UPDATED_AT => display_time(&record.updated_at),
                other => household
                    .remove(other)
                    .or_else(|| record.fields.get(other).map(str::to_string))
                    .unwrap_or_default(),
            })
            .collect()
    }
}

fn display_time(ts: &DateTime<Utc>) -> String {
    ts.format(DISPLAY_TIME_FORMAT).to_string()
}
