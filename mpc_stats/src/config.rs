//! Study and query descriptions.
//!
//! Both are JSON documents. Raw `Deserialize` structs mirror the files; the public
//! types are validated conversions of them.

use std::{fs, path::Path};

use mpc::{Identity, Role};
use serde::Deserialize;

use crate::{error::ConfigError, global::GlobalInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Bool,
    Categorical,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub name: String,
}

/// Columns held by the data owners of one vertical.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct VerticalSpec {
    #[serde(rename = "verticalIndex")]
    pub vertical_index: u32,
    pub columns: Vec<ColumnSpec>,
}

/// One organization of the study with every role it plays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub org: u128,
    pub name: Option<String>,
    pub identities: Vec<Identity>,
    pub allowed_query_count: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct StudyConfig {
    pub study_id: String,
    pub max_list_size: usize,
    pub key_max: u64,
    pub value_bits: usize,
    pub lexicon: Vec<VerticalSpec>,
    pub peers: Vec<Peer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStudyConfig {
    study_id: String,
    max_list_size: usize,
    #[serde(default)]
    key_max: Option<u64>,
    #[serde(default)]
    value_bits: Option<usize>,
    lexicon: Vec<VerticalSpec>,
    peers: Vec<RawPeer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeer {
    organization_id: String,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    dataowner: Option<RawDataOwner>,
    #[serde(default)]
    dealer: Option<serde_json::Value>,
    #[serde(default)]
    recipient: Option<serde_json::Value>,
    #[serde(default)]
    analyst: Option<RawAnalyst>,
}

#[derive(Deserialize)]
struct RawDataOwner {
    vertical: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalyst {
    #[serde(default)]
    allowed_query_count: Option<u64>,
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
}

impl StudyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&read_file(path.as_ref())?)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let raw: RawStudyConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawStudyConfig) -> Result<Self, ConfigError> {
        if raw.max_list_size == 0 {
            return Err(ConfigError::invalid("maxListSize must be positive"));
        }
        let key_max = raw.key_max.unwrap_or(GlobalInfo::DEFAULT_KEY_MAX);
        if key_max < 2 {
            return Err(ConfigError::invalid("keyMax must be at least 2"));
        }

        for (i, vertical) in raw.lexicon.iter().enumerate() {
            if raw.lexicon[..i]
                .iter()
                .any(|v| v.vertical_index == vertical.vertical_index)
            {
                return Err(ConfigError::invalid(format!(
                    "vertical {} declared twice in the lexicon",
                    vertical.vertical_index
                )));
            }
        }

        let peers = raw
            .peers
            .into_iter()
            .map(|p| {
                let org = p.organization_id.parse::<u128>().map_err(|e| {
                    ConfigError::invalid(format!("organization id {:?}: {}", p.organization_id, e))
                })?;
                let mut identities = Vec::new();
                if let Some(owner) = &p.dataowner {
                    identities.push(Identity::data_owner(org, owner.vertical));
                }
                if p.dealer.is_some() {
                    identities.push(Identity::dealer(org));
                }
                if p.recipient.is_some() {
                    identities.push(Identity::recipient(org));
                }
                if p.analyst.is_some() {
                    identities.push(Identity::new(org, Role::Analyst, 0));
                }
                Ok(Peer {
                    org,
                    name: p.organization_name,
                    identities,
                    allowed_query_count: p.analyst.and_then(|a| a.allowed_query_count),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let study = Self {
            study_id: raw.study_id,
            max_list_size: raw.max_list_size,
            key_max,
            value_bits: raw.value_bits.unwrap_or(GlobalInfo::DEFAULT_VALUE_BITS),
            lexicon: raw.lexicon,
            peers,
        };
        if study.identities().filter(|id| id.role == Role::Dealer).count() > 1 {
            return Err(ConfigError::invalid("a study has at most one dealer"));
        }
        Ok(study)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.peers.iter().flat_map(|p| p.identities.iter())
    }

    pub fn dealer(&self) -> Option<Identity> {
        self.identities().find(|id| id.role == Role::Dealer).copied()
    }

    pub fn vertical(&self, index: u32) -> Option<&VerticalSpec> {
        self.lexicon.iter().find(|v| v.vertical_index == index)
    }

    /// Lexicon entry a query column refers to.
    pub fn column(&self, col: &ColumnRef) -> Result<&ColumnSpec, ConfigError> {
        let vertical = self
            .vertical(col.vertical)
            .ok_or_else(|| {
                ConfigError::invalid(format!("vertical {} is not in the lexicon", col.vertical))
            })?;
        match (col.column_index, &col.column_name) {
            (Some(index), _) => vertical.columns.get(index).ok_or_else(|| {
                ConfigError::invalid(format!(
                    "vertical {} has no column number {}",
                    col.vertical, index
                ))
            }),
            (None, Some(name)) => vertical
                .columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| {
                    ConfigError::invalid(format!(
                        "vertical {} has no column {:?}",
                        col.vertical, name
                    ))
                }),
            (None, None) => Err(ConfigError::invalid(format!(
                "column of vertical {} has neither index nor name",
                col.vertical
            ))),
        }
    }

    /// Study constants for a query run by `num_data_owners` data owners.
    pub fn global_info(&self, num_data_owners: usize) -> GlobalInfo {
        let mut global = GlobalInfo::new(self.max_list_size, num_data_owners);
        global.key_max = self.key_max;
        global.value_bits = self.value_bits;
        global
    }
}

/// Column of one vertical, by position in the lexicon or by name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub vertical: u32,
    #[serde(default)]
    pub column_index: Option<usize>,
    #[serde(default)]
    pub column_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JoinColumn {
    pub col: ColumnRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JoinOn {
    pub first: JoinColumn,
    pub second: JoinColumn,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStatement {
    #[serde(rename = "type", default = "default_join_type")]
    pub kind: String,
    pub join_ons: Vec<JoinOn>,
}

fn default_join_type() -> String {
    "inner".to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MomentType {
    Count,
    Mean,
    Variance,
    Skew,
    Kurtosis,
}

impl MomentType {
    /// Highest power sum needed, `None` if the statistic is not supported.
    pub fn highest_moment(self) -> Option<usize> {
        match self {
            MomentType::Count => Some(0),
            MomentType::Mean => Some(1),
            MomentType::Variance => Some(2),
            MomentType::Skew => Some(3),
            MomentType::Kurtosis => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentQuery {
    pub col: ColumnRef,
    pub moment_type: MomentType,
    #[serde(default = "default_true")]
    pub reveal_count: bool,
    #[serde(default, rename = "bits_of_precision")]
    pub bits_of_precision: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RegressionQuery {
    pub dep_var: ColumnRef,
    pub indep_vars: Vec<ColumnRef>,
    #[serde(default = "default_true")]
    pub fit_intercept: bool,
    #[serde(default)]
    pub table_cell_bytes: Option<usize>,
    #[serde(default)]
    pub num_table_rows: Option<usize>,
    #[serde(default)]
    pub bits_of_precision: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Function {
    MomentFunction(MomentQuery),
    LinearRegressionFunction(RegressionQuery),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    pub join_statement: JoinStatement,
    pub function: Function,
}

impl Query {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&read_file(path.as_ref())?)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The two joined verticals, lower index first.
    pub fn verticals(&self) -> Result<(u32, u32), ConfigError> {
        let first = self
            .join_statement
            .join_ons
            .first()
            .ok_or_else(|| ConfigError::invalid("query has no join column"))?;
        let (a, b) = (first.first.col.vertical, first.second.col.vertical);
        if a == b {
            return Err(ConfigError::invalid(format!("join of vertical {} with itself", a)));
        }
        for on in &self.join_statement.join_ons {
            let (x, y) = (on.first.col.vertical, on.second.col.vertical);
            if !((x == a && y == b) || (x == b && y == a)) {
                return Err(ConfigError::invalid(format!(
                    "join columns of verticals {} and {} outside verticals {} and {}",
                    x, y, a, b
                )));
            }
        }
        Ok((a.min(b), a.max(b)))
    }

    /// Join columns of `vertical`, in join order.
    pub fn join_columns(&self, vertical: u32) -> impl Iterator<Item = &ColumnRef> + '_ {
        self.join_statement.join_ons.iter().map(move |on| {
            if on.first.col.vertical == vertical {
                &on.first.col
            } else {
                &on.second.col
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const STUDY: &str = r#"{
        "studyId": "42",
        "maxListSize": 16,
        "keyMax": 1000,
        "valueBits": 6,
        "lexicon": [
            { "verticalIndex": 0, "columns": [
                { "type": "integer", "name": "id" },
                { "type": "real", "name": "age" },
                { "type": "real", "name": "height" }
            ] },
            { "verticalIndex": 1, "columns": [
                { "type": "integer", "name": "id" },
                { "type": "real", "name": "income" },
                { "type": "bool", "name": "smoker" }
            ] }
        ],
        "peers": [
            { "organizationId": "1", "organizationName": "clinic", "dataowner": { "vertical": 0 } },
            { "organizationId": "2", "dataowner": { "vertical": 1 }, "analyst": { "allowedQueryCount": 5 } },
            { "organizationId": "3", "dealer": {} },
            { "organizationId": "4", "recipient": {}, "analyst": {} }
        ]
    }"#;

    #[test]
    fn test_parse_study() {
        let study = StudyConfig::parse(STUDY).unwrap();
        assert_eq!(study.max_list_size, 16);
        assert_eq!(study.key_max, 1000);
        assert_eq!(study.value_bits, 6);
        assert_eq!(study.dealer(), Some(Identity::dealer(3)));
        assert_eq!(study.peers[1].allowed_query_count, Some(5));
        assert_eq!(study.peers[0].name.as_deref(), Some("clinic"));
        assert_eq!(
            study.peers[3].identities,
            vec![Identity::recipient(4), Identity::new(4, Role::Analyst, 0)]
        );

        let by_index = ColumnRef {
            vertical: 1,
            column_index: Some(1),
            column_name: None,
        };
        assert_eq!(study.column(&by_index).unwrap().name, "income");
        let by_name = ColumnRef {
            vertical: 0,
            column_index: None,
            column_name: Some("height".to_string()),
        };
        assert_eq!(study.column(&by_name).unwrap().kind, ColumnType::Real);
        let missing = ColumnRef {
            vertical: 2,
            column_index: Some(0),
            column_name: None,
        };
        assert!(study.column(&missing).is_err());
    }

    #[test]
    fn test_reject_two_dealers() {
        let json = r#"{ "studyId": "1", "maxListSize": 4, "lexicon": [], "peers": [
            { "organizationId": "1", "dealer": {} },
            { "organizationId": "2", "dealer": {} }
        ] }"#;
        assert!(matches!(StudyConfig::parse(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_queries() {
        let moments = Query::parse(
            r#"{ "id": "q1",
                 "joinStatement": { "type": "inner", "joinOns": [
                     { "first": { "col": { "vertical": 1, "columnIndex": 0 } },
                       "second": { "col": { "vertical": 0, "columnName": "id" } } } ] },
                 "function": { "type": "MomentFunction",
                     "col": { "vertical": 1, "columnIndex": 1 },
                     "momentType": "variance", "revealCount": false, "bits_of_precision": 4 } }"#,
        )
        .unwrap();
        assert_eq!(moments.verticals().unwrap(), (0, 1));
        assert_eq!(moments.join_columns(0).next().unwrap().column_name.as_deref(), Some("id"));
        match &moments.function {
            Function::MomentFunction(m) => {
                assert_eq!(m.moment_type.highest_moment(), Some(2));
                assert!(!m.reveal_count);
                assert_eq!(m.bits_of_precision, Some(4));
            }
            other => panic!("unexpected function {:?}", other),
        }

        let regression = Query::parse(
            r#"{ "id": "q2",
                 "joinStatement": { "joinOns": [
                     { "first": { "col": { "vertical": 0, "columnIndex": 0 } },
                       "second": { "col": { "vertical": 1, "columnIndex": 0 } } } ] },
                 "function": { "type": "LinearRegressionFunction",
                     "dep_var": { "vertical": 1, "columnIndex": 1 },
                     "indep_vars": [ { "vertical": 0, "columnIndex": 1 } ],
                     "fit_intercept": false } }"#,
        )
        .unwrap();
        assert_eq!(regression.join_statement.kind, "inner");
        match &regression.function {
            Function::LinearRegressionFunction(r) => {
                assert!(!r.fit_intercept);
                assert_eq!(r.indep_vars.len(), 1);
                assert_eq!(r.table_cell_bytes, None);
            }
            other => panic!("unexpected function {:?}", other),
        }
    }

    #[test]
    fn test_join_outside_verticals() {
        let query = Query::parse(
            r#"{ "id": "q3",
                 "joinStatement": { "joinOns": [
                     { "first": { "col": { "vertical": 0, "columnIndex": 0 } },
                       "second": { "col": { "vertical": 1, "columnIndex": 0 } } },
                     { "first": { "col": { "vertical": 0, "columnIndex": 1 } },
                       "second": { "col": { "vertical": 2, "columnIndex": 0 } } } ] },
                 "function": { "type": "MomentFunction",
                     "col": { "vertical": 1, "columnIndex": 1 }, "momentType": "mean" } }"#,
        )
        .unwrap();
        assert!(query.verticals().is_err());
    }
}
