// ==========================================
// 受助人登记系统 - 家庭成员列编解码
// ==========================================
// 格式: 十个并列列（family_member_*）,单元格内多个成员以 " | " 拼接
// 导入: 按分隔符拆分后按下标对齐,以最长列表为准；姓名为空的成员跳过
// 导出: 布尔标记输出 نعم/لا,日期输出 %Y-%m-%d
// ==========================================

use crate::domain::field_catalog::{
    FAMILY_MEMBER_BIRTH_DATE, FAMILY_MEMBER_EDUCATION_STATUS, FAMILY_MEMBER_HEALTH_STATUS,
    FAMILY_MEMBER_IS_GUARDIAN, FAMILY_MEMBER_NAME, FAMILY_MEMBER_NATIONAL_ID,
    FAMILY_MEMBER_NEEDS_CARE, FAMILY_MEMBER_NOTES, FAMILY_MEMBER_PHONE, FAMILY_MEMBER_RELATION,
    HOUSEHOLD_FIELDS,
};
use crate::domain::identity::{HouseholdMember, Relation};
use crate::importer::parsed_row::ParsedRow;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

pub const MEMBER_SEPARATOR: &str = " | ";

const YES: &str = "نعم";
const NO: &str = "لا";

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// 选择集中是否包含家庭成员列
pub fn selects_household<'a, I>(selected: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    selected
        .into_iter()
        .any(|key| HOUSEHOLD_FIELDS.contains(&key.as_str()))
}

/// 从数据行解码家庭成员
pub fn decode_members(row: &ParsedRow) -> Vec<HouseholdMember> {
    let columns: HashMap<&str, Vec<&str>> = HOUSEHOLD_FIELDS
        .iter()
        .map(|key| (*key, split_cell(row.value(key))))
        .collect();

    let longest = columns.values().map(Vec::len).max().unwrap_or(0);
    let at = |key: &str, i: usize| part_at(&columns, key, i);

    (0..longest)
        .filter_map(|i| {
            let name = at(FAMILY_MEMBER_NAME, i);
            if name.is_empty() {
                return None;
            }

            let relation = at(FAMILY_MEMBER_RELATION, i);
            Some(HouseholdMember {
                member_name: name.to_string(),
                relation: if relation.is_empty() {
                    Relation::default()
                } else {
                    Relation::parse(relation)
                },
                national_id: non_empty(at(FAMILY_MEMBER_NATIONAL_ID, i)),
                phone: non_empty(at(FAMILY_MEMBER_PHONE, i)),
                birth_date: parse_birth_date(at(FAMILY_MEMBER_BIRTH_DATE, i)),
                is_guardian: parse_flag(at(FAMILY_MEMBER_IS_GUARDIAN, i)),
                needs_care: parse_flag(at(FAMILY_MEMBER_NEEDS_CARE, i)),
                health_status: non_empty(at(FAMILY_MEMBER_HEALTH_STATUS, i)),
                education_status: non_empty(at(FAMILY_MEMBER_EDUCATION_STATUS, i)),
                notes: non_empty(at(FAMILY_MEMBER_NOTES, i)),
            })
        })
        .collect()
}

/// 将家庭成员编码为并列列文本
pub fn encode_members(members: &[HouseholdMember]) -> HashMap<&'static str, String> {
    let join = |f: &dyn Fn(&HouseholdMember) -> String| -> String {
        members.iter().map(f).collect::<Vec<_>>().join(MEMBER_SEPARATOR)
    };
    let text = |v: &Option<String>| v.clone().unwrap_or_default();

    let mut cells = HashMap::with_capacity(HOUSEHOLD_FIELDS.len());
    cells.insert(FAMILY_MEMBER_NAME, join(&|m| m.member_name.clone()));
    cells.insert(FAMILY_MEMBER_RELATION, join(&|m| m.relation.as_str().to_string()));
    cells.insert(FAMILY_MEMBER_NATIONAL_ID, join(&|m| text(&m.national_id)));
    cells.insert(FAMILY_MEMBER_PHONE, join(&|m| text(&m.phone)));
    cells.insert(
        FAMILY_MEMBER_BIRTH_DATE,
        join(&|m| {
            m.birth_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        }),
    );
    cells.insert(FAMILY_MEMBER_HEALTH_STATUS, join(&|m| text(&m.health_status)));
    cells.insert(FAMILY_MEMBER_EDUCATION_STATUS, join(&|m| text(&m.education_status)));
    cells.insert(FAMILY_MEMBER_NEEDS_CARE, join(&|m| flag_text(m.needs_care).to_string()));
    cells.insert(FAMILY_MEMBER_IS_GUARDIAN, join(&|m| flag_text(m.is_guardian).to_string()));
    cells.insert(FAMILY_MEMBER_NOTES, join(&|m| text(&m.notes)));
    cells
}

pub fn flag_text(flag: bool) -> &'static str {
    if flag {
        YES
    } else {
        NO
    }
}

/// نعم / yes / 1 / true（不区分大小写）
pub fn parse_flag(raw: &str) -> bool {
    let value = raw.trim();
    value == YES
        || value == "1"
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("true")
}

/// 宽松日期解析,无法识别时为 None
pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn part_at<'a>(columns: &HashMap<&str, Vec<&'a str>>, key: &str, i: usize) -> &'a str {
    columns
        .get(key)
        .and_then(|parts| parts.get(i))
        .copied()
        .unwrap_or("")
}

fn split_cell(cell: &str) -> Vec<&str> {
    if cell.trim().is_empty() {
        return Vec::new();
    }
    cell.split('|').map(str::trim).collect()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field_catalog::{ColumnMap, FULL_NAME, NATIONAL_ID};
    use std::sync::Arc;

    fn household_row(values: &[(&str, &str)]) -> ParsedRow {
        let mut map = ColumnMap::new();
        map.insert(NATIONAL_ID, 0);
        map.insert(FULL_NAME, 1);
        let mut cells = vec!["123456789".to_string(), "أحمد".to_string()];
        for (i, (key, value)) in values.iter().enumerate() {
            map.insert(key, i + 2);
            cells.push(value.to_string());
        }
        ParsedRow::new(2, cells, Arc::new(map))
    }

    #[test]
    fn test_decode_zips_to_longest_and_skips_nameless() {
        let row = household_row(&[
            (FAMILY_MEMBER_NAME, "سارة | | علي"),
            (FAMILY_MEMBER_RELATION, "ابنة | ابن | ابن | حفيد"),
            (FAMILY_MEMBER_BIRTH_DATE, "2010-05-01 | x | 31/12/2015"),
            (FAMILY_MEMBER_NEEDS_CARE, "نعم | لا | TRUE"),
        ]);

        let members = decode_members(&row);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member_name, "سارة");
        assert_eq!(members[0].relation, Relation::Daughter);
        assert_eq!(members[0].birth_date, NaiveDate::from_ymd_opt(2010, 5, 1));
        assert!(members[0].needs_care);
        assert_eq!(members[1].member_name, "علي");
        assert_eq!(members[1].birth_date, NaiveDate::from_ymd_opt(2015, 12, 31));
        assert!(members[1].needs_care);
        assert!(!members[1].is_guardian);
    }

    #[test]
    fn test_encode_then_decode_preserves_members() {
        let members = vec![
            HouseholdMember {
                member_name: "فاطمة".into(),
                relation: Relation::Wife,
                national_id: Some("987654321".into()),
                birth_date: NaiveDate::from_ymd_opt(1990, 1, 2),
                is_guardian: true,
                ..Default::default()
            },
            HouseholdMember {
                member_name: "يوسف".into(),
                relation: Relation::Other("حفيد".into()),
                notes: Some("يدرس".into()),
                ..Default::default()
            },
        ];

        let cells = encode_members(&members);
        assert_eq!(cells[FAMILY_MEMBER_IS_GUARDIAN], "نعم | لا");
        assert_eq!(cells[FAMILY_MEMBER_NATIONAL_ID], "987654321 | ");

        let values: Vec<(&str, &str)> = HOUSEHOLD_FIELDS
            .iter()
            .map(|key| (*key, cells[key].as_str()))
            .collect();
        assert_eq!(decode_members(&household_row(&values)), members);
    }

    #[test]
    fn test_parse_flag_variants() {
        for yes in ["نعم", "yes", "YES", "1", "True"] {
            assert!(parse_flag(yes), "{}", yes);
        }
        for no in ["لا", "no", "0", ""] {
            assert!(!parse_flag(no), "{}", no);
        }
    }
}
