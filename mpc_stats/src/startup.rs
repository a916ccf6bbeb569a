//! Turns a query, the study and one party's files into that party's root fronctocol.
//!
//! Every participant of a query builds the same parameter bundle from the same
//! study and query, then picks its side: data owners read their CSV into join rows,
//! the dealer serves randomness and recipients collect the result.

use std::path::Path;

use mpc::{Fronctocol, Identity, InstanceId, PeerSet, Role};
use num_bigint::{BigInt, BigUint};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    config::{ColumnRef, Function, MomentQuery, Query, RegressionQuery, StudyConfig, VerticalSpec},
    csv_input::CsvTable,
    error::ConfigError,
    fixed_point::bounded_fixed,
    global::GlobalInfo,
    house::QueryHouse,
    join::{JoinRow, PairwiseJoinHouse},
    moments::{Moments, MomentsInfo, MomentsReceiver, MomentsResult},
    regression::{
        Layout, Regression, RegressionInfo, RegressionReceiver, RegressionResult, Regressor,
    },
    table::{f_table_path, t_table_path, StatTable},
};

/// Output of a recipient's root.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    Moments(MomentsResult),
    Regression(RegressionResult),
}

/// A party's root fronctocol, ready to start.
pub struct Launch {
    pub instance: InstanceId,
    pub fronctocol: Box<dyn Fronctocol>,
    pub peers: PeerSet,
    /// The root completes with a [`QueryResult`] rather than `()`.
    pub yields_result: bool,
}

/// Where a party's input files come from.
pub trait Inputs {
    fn csv(&self, vertical: &VerticalSpec) -> Result<CsvTable, ConfigError>;

    fn f_table(
        &self,
        num_indep_vars: usize,
        cell_bytes: usize,
        max_rows: usize,
    ) -> Result<StatTable, ConfigError>;

    fn t_table(&self, cell_bytes: usize, max_rows: usize) -> Result<StatTable, ConfigError>;
}

/// A party's CSV file and the directory holding the F and t tables.
pub struct Files<'a> {
    pub csv: &'a Path,
    pub tables: &'a Path,
}

impl Inputs for Files<'_> {
    fn csv(&self, vertical: &VerticalSpec) -> Result<CsvTable, ConfigError> {
        CsvTable::load(self.csv, vertical)
    }

    fn f_table(
        &self,
        num_indep_vars: usize,
        cell_bytes: usize,
        max_rows: usize,
    ) -> Result<StatTable, ConfigError> {
        StatTable::load(f_table_path(self.tables, num_indep_vars), cell_bytes, max_rows)
    }

    fn t_table(&self, cell_bytes: usize, max_rows: usize) -> Result<StatTable, ConfigError> {
        StatTable::load(t_table_path(self.tables), cell_bytes, max_rows)
    }
}

/// Root fronctocol of `me` for `query`, `None` if `me` takes no part in it or the
/// query cannot run. Failures are logged.
pub fn dispatch(
    inputs: &impl Inputs,
    query: &Query,
    study: &StudyConfig,
    me: &Identity,
) -> Option<Launch> {
    match prepare(inputs, query, study, me) {
        Ok(Some(launch)) => Some(launch),
        Ok(None) => {
            info!(query = %query.id, %me, "not a participant of this query");
            None
        }
        Err(e) => {
            error!(query = %query.id, %me, "cannot start query: {}", e);
            None
        }
    }
}

/// Participants of a query over two verticals.
struct Participants {
    peers: PeerSet,
    verticals: (u32, u32),
}

impl Participants {
    fn new(query: &Query, study: &StudyConfig) -> Result<Self, ConfigError> {
        let verticals = query.verticals()?;
        for on in &query.join_statement.join_ons {
            study.column(&on.first.col)?;
            study.column(&on.second.col)?;
        }
        if query.join_statement.kind != "inner" {
            return Err(ConfigError::invalid(format!(
                "unsupported join type {:?}",
                query.join_statement.kind
            )));
        }

        let mut peers = PeerSet::new();
        let dealer = study
            .dealer()
            .ok_or_else(|| ConfigError::invalid("study has no dealer"))?;
        peers.add(dealer);
        for id in study.identities() {
            let joined = id.role == Role::DataOwner
                && (id.vertical == verticals.0 || id.vertical == verticals.1);
            if joined || id.role == Role::Recipient {
                peers.add(*id);
            }
        }
        for v in [verticals.0, verticals.1] {
            if peers.vertical(v).is_empty() {
                return Err(ConfigError::invalid(format!("vertical {} has no data owner", v)));
            }
        }
        if peers.recipients().is_empty() {
            return Err(ConfigError::invalid("study has no recipient"));
        }
        Ok(Self { peers, verticals })
    }

    /// Checks that `col` lies in one of the joined verticals.
    fn joined<'a>(&self, study: &'a StudyConfig, col: &ColumnRef) -> Result<&'a str, ConfigError> {
        if col.vertical != self.verticals.0 && col.vertical != self.verticals.1 {
            return Err(ConfigError::invalid(format!(
                "column of vertical {} is outside the joined verticals",
                col.vertical
            )));
        }
        Ok(&study.column(col)?.name)
    }
}

/// [`dispatch`] without the logging.
pub fn prepare(
    inputs: &impl Inputs,
    query: &Query,
    study: &StudyConfig,
    me: &Identity,
) -> Result<Option<Launch>, ConfigError> {
    let participants = Participants::new(query, study)?;
    if !participants.peers.contains(me) {
        return Ok(None);
    }
    let global = study.global_info(participants.peers.num_data_owners());
    let fronctocol = match &query.function {
        Function::MomentFunction(m) => moments(inputs, query, study, &participants, global, m, me)?,
        Function::LinearRegressionFunction(r) => {
            regression(inputs, query, study, &participants, global, r, me)?
        }
    };
    Ok(Some(Launch {
        instance: InstanceId::root(&query.id),
        fronctocol,
        peers: participants.peers,
        yields_result: me.role == Role::Recipient,
    }))
}

/// CSV of a data owner and its composite join keys.
fn owner_input(
    inputs: &impl Inputs,
    query: &Query,
    study: &StudyConfig,
    global: &GlobalInfo,
    me: &Identity,
) -> Result<(CsvTable, Vec<BigUint>), ConfigError> {
    let vertical = study
        .vertical(me.vertical)
        .ok_or_else(|| {
            ConfigError::invalid(format!("vertical {} is not in the lexicon", me.vertical))
        })?;
    let csv = inputs.csv(vertical)?;
    if csv.len() > global.max_list_size {
        return Err(ConfigError::invalid(format!(
            "{} rows exceed the list size of {}",
            csv.len(),
            global.max_list_size
        )));
    }
    let names = query
        .join_columns(me.vertical)
        .map(|col| study.column(col).map(|c| c.name.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let keys = csv.join_keys(&names, global.key_max)?;
    Ok((csv, keys))
}

fn moments(
    inputs: &impl Inputs,
    query: &Query,
    study: &StudyConfig,
    participants: &Participants,
    mut global: GlobalInfo,
    m: &MomentQuery,
    me: &Identity,
) -> Result<Box<dyn Fronctocol>, ConfigError> {
    let highest_moment = m
        .moment_type
        .highest_moment()
        .ok_or_else(|| ConfigError::invalid(format!("{:?} is not supported", m.moment_type)))?;
    let column = participants.joined(study, &m.col)?;
    if let Some(bits) = m.bits_of_precision {
        global.bits_of_precision = bits;
    }
    let info = MomentsInfo::new(
        &global,
        highest_moment,
        m.reveal_count,
        query.join_statement.join_ons.len(),
        participants.verticals,
        m.col.vertical,
    )?;

    Ok(match me.role {
        Role::DataOwner => {
            let (csv, keys) = owner_input(inputs, query, study, &global, me)?;
            let rows = if me.vertical == m.col.vertical {
                info.data_rows(keys, &csv.numbers(column)?)?
            } else {
                info.indicator_rows(keys)
            };
            Box::new(Moments::new(info, rows))
        }
        Role::Dealer => {
            let join = PairwiseJoinHouse::new(info.join.clone(), info.join_randomness());
            Box::new(QueryHouse::new(&info.randomness_order(), Box::new(join)))
        }
        Role::Recipient => Box::new(MomentsReceiver::new(info)),
        Role::Analyst => return Err(ConfigError::invalid("analysts do not run queries")),
    })
}

fn regression(
    inputs: &impl Inputs,
    query: &Query,
    study: &StudyConfig,
    participants: &Participants,
    mut global: GlobalInfo,
    r: &RegressionQuery,
    me: &Identity,
) -> Result<Box<dyn Fronctocol>, ConfigError> {
    if r.indep_vars.is_empty() {
        return Err(ConfigError::invalid("regression without independent variables"));
    }
    let data_vertical = r.dep_var.vertical;
    let dep_name = participants.joined(study, &r.dep_var)?;

    let mut regressors = Vec::new();
    let mut names = Vec::new();
    if r.fit_intercept {
        regressors.push(Regressor::Intercept);
        names.push("intercept".to_string());
    }
    let mut left = Vec::new();
    let mut right = Vec::new();
    for col in &r.indep_vars {
        let name = participants.joined(study, col)?;
        if col.vertical == data_vertical {
            regressors.push(Regressor::Right(right.len()));
            right.push(name);
        } else {
            regressors.push(Regressor::Left(left.len()));
            left.push(name);
        }
        names.push(name.to_string());
    }

    if let Some(bits) = r.bits_of_precision {
        global.bits_of_precision = bits;
    }
    if let Some(cell_bytes) = r.table_cell_bytes {
        global.bytes_in_lookup_table_cells = cell_bytes;
    }
    if let Some(rows) = r.num_table_rows {
        global.max_table_rows = rows;
    }
    let f_table = inputs.f_table(
        r.indep_vars.len(),
        global.bytes_in_lookup_table_cells,
        global.max_table_rows,
    )?;
    let t_table = inputs.t_table(global.bytes_in_lookup_table_cells, global.max_table_rows)?;
    let info = RegressionInfo::new(
        &global,
        Layout::new(regressors),
        names,
        query.join_statement.join_ons.len(),
        participants.verticals,
        data_vertical,
        f_table,
        t_table,
    )?;

    Ok(match me.role {
        Role::DataOwner => {
            let (csv, keys) = owner_input(inputs, query, study, &global, me)?;
            let fixed = |name: &str| -> Result<Vec<BigInt>, ConfigError> {
                csv.numbers(name)?
                    .into_iter()
                    .map(|x| {
                        bounded_fixed(x, global.bits_of_precision, global.value_bits).ok_or_else(
                            || {
                                ConfigError::invalid(format!(
                                    "{} = {} is outside ±2^{}",
                                    name, x, global.value_bits
                                ))
                            },
                        )
                    })
                    .collect()
            };
            let p = &info.start_modulus;
            let rows: Vec<JoinRow> = if me.vertical == data_vertical {
                let ys = fixed(dep_name)?;
                let xs = right.iter().map(|name| fixed(name)).collect::<Result<Vec<_>, _>>()?;
                keys.into_iter()
                    .zip(ys)
                    .enumerate()
                    .map(|(i, (key, y))| {
                        let row: Vec<BigInt> = xs.iter().map(|x| x[i].clone()).collect();
                        JoinRow {
                            key,
                            payload: info.layout.right_row(&y, &row, p),
                        }
                    })
                    .collect()
            } else {
                let xs = left.iter().map(|name| fixed(name)).collect::<Result<Vec<_>, _>>()?;
                keys.into_iter()
                    .enumerate()
                    .map(|(i, key)| {
                        let row: Vec<BigInt> = xs.iter().map(|x| x[i].clone()).collect();
                        JoinRow {
                            key,
                            payload: info.layout.left_row(&row, p),
                        }
                    })
                    .collect()
            };
            Box::new(Regression::new(info, rows))
        }
        Role::Dealer => {
            let join = PairwiseJoinHouse::new(info.join.clone(), info.join_randomness());
            Box::new(QueryHouse::new(&info.randomness_order(), Box::new(join)))
        }
        Role::Recipient => Box::new(RegressionReceiver::new(info)),
        Role::Analyst => return Err(ConfigError::invalid("analysts do not run queries")),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mpc::{simulation::Simulation, ProtocolError};

    use super::*;
    use crate::regression::tests::{F_TABLE, T_TABLE};

    const STUDY: &str = r#"{
        "studyId": "7",
        "maxListSize": 6,
        "keyMax": 16,
        "valueBits": 4,
        "lexicon": [
            { "verticalIndex": 0, "columns": [
                { "type": "integer", "name": "id" },
                { "type": "real", "name": "x" },
                { "type": "real", "name": "w" }
            ] },
            { "verticalIndex": 1, "columns": [
                { "type": "integer", "name": "id" },
                { "type": "real", "name": "y" },
                { "type": "real", "name": "z" }
            ] }
        ],
        "peers": [
            { "organizationId": "1", "dataowner": { "vertical": 0 } },
            { "organizationId": "2", "dataowner": { "vertical": 1 } },
            { "organizationId": "3", "dealer": {} },
            { "organizationId": "4", "recipient": {} },
            { "organizationId": "5", "analyst": {} }
        ]
    }"#;

    /// Study with `left` owners of vertical 0 and `right` owners of vertical 1.
    fn study(left: usize, right: usize, max_list_size: usize) -> StudyConfig {
        let mut study = StudyConfig::parse(STUDY).unwrap();
        study.max_list_size = max_list_size;
        study.peers.retain(|p| !p.identities.iter().any(Identity::is_data_owner));
        for i in 0..left + right {
            let vertical = u32::from(i >= left);
            study.peers.push(crate::config::Peer {
                org: 100 + i as u128,
                name: None,
                identities: vec![Identity::data_owner(100 + i as u128, vertical)],
                allowed_query_count: None,
            });
        }
        study
    }

    struct Memory {
        csv: Option<String>,
    }

    impl Inputs for Memory {
        fn csv(&self, vertical: &VerticalSpec) -> Result<CsvTable, ConfigError> {
            let text = self
                .csv
                .as_deref()
                .ok_or_else(|| ConfigError::invalid("no csv for this party"))?;
            CsvTable::parse(text, "memory.csv", vertical)
        }

        fn f_table(
            &self,
            _: usize,
            cell_bytes: usize,
            max_rows: usize,
        ) -> Result<StatTable, ConfigError> {
            StatTable::parse(F_TABLE, "f.csv", cell_bytes, max_rows)
        }

        fn t_table(&self, cell_bytes: usize, max_rows: usize) -> Result<StatTable, ConfigError> {
            StatTable::parse(T_TABLE, "t.csv", cell_bytes, max_rows)
        }
    }

    /// Runs every participant of `query` and returns the recipient's result.
    fn run(
        study: &StudyConfig,
        query: &str,
        csv: &HashMap<Identity, String>,
    ) -> Result<QueryResult, ProtocolError> {
        let query = Query::parse(query).unwrap();
        let mut sim = Simulation::new();
        let mut recipient = None;
        let mut instance = None;
        for id in study.identities() {
            let inputs = Memory {
                csv: csv.get(id).cloned(),
            };
            if let Some(launch) = prepare(&inputs, &query, study, id).unwrap() {
                if launch.yields_result {
                    recipient = Some(*id);
                }
                instance = Some(launch.instance);
                sim.start(*id, launch.instance, launch.fronctocol, launch.peers)?;
            }
        }
        sim.run()?;
        sim.output::<QueryResult>(&recipient.unwrap(), &instance.unwrap())
    }

    /// Rows `id, a, b` split round-robin among the owners of one vertical.
    fn split(
        study: &StudyConfig,
        vertical: u32,
        header: &str,
        rows: &[(u64, f64, f64)],
    ) -> HashMap<Identity, String> {
        let owners: Vec<Identity> = study
            .identities()
            .filter(|id| id.is_data_owner() && id.vertical == vertical)
            .copied()
            .collect();
        let mut files: HashMap<Identity, String> = owners
            .iter()
            .map(|id| (*id, format!("{}\n", header)))
            .collect();
        for (i, (key, a, b)) in rows.iter().enumerate() {
            let file = files.get_mut(&owners[i % owners.len()]).unwrap();
            file.push_str(&format!("{},{},{}\n", key, a, b));
        }
        files
    }

    const MOMENT_BITS: i32 = 4;

    /// Accepted distance from the plaintext statistic.
    fn moments_tolerance() -> f64 {
        2f64.powi(-2 * MOMENT_BITS)
    }

    fn moments_query(moment: &str, reveal_count: bool) -> String {
        format!(
            r#"{{ "id": "moments-{}",
                 "joinStatement": {{ "joinOns": [
                     {{ "first": {{ "col": {{ "vertical": 0, "columnName": "id" }} }},
                       "second": {{ "col": {{ "vertical": 1, "columnName": "id" }} }} }} ] }},
                 "function": {{ "type": "MomentFunction",
                     "col": {{ "vertical": 1, "columnName": "y" }},
                     "momentType": "{}", "revealCount": {}, "bits_of_precision": {} }} }}"#,
            moment, moment, reveal_count, MOMENT_BITS
        )
    }

    fn regression_query(indep_vars: &[(u32, &str)], fit_intercept: bool) -> String {
        let vars: Vec<String> = indep_vars
            .iter()
            .map(|(v, name)| format!(r#"{{ "vertical": {}, "columnName": "{}" }}"#, v, name))
            .collect();
        format!(
            r#"{{ "id": "regression",
                 "joinStatement": {{ "joinOns": [
                     {{ "first": {{ "col": {{ "vertical": 0, "columnIndex": 0 }} }},
                       "second": {{ "col": {{ "vertical": 1, "columnIndex": 0 }} }} }} ] }},
                 "function": {{ "type": "LinearRegressionFunction",
                     "dep_var": {{ "vertical": 1, "columnName": "y" }},
                     "indep_vars": [ {} ],
                     "fit_intercept": {},
                     "table_cell_bytes": 2, "num_table_rows": 10, "bits_of_precision": 4 }} }}"#,
            vars.join(", "),
            fit_intercept
        )
    }

    const LEFT: [(u64, f64, f64); 6] = [
        (1, 1.0, 2.0),
        (2, 2.0, -1.0),
        (3, 3.0, 0.0),
        (4, 4.0, 3.0),
        (5, 5.0, 1.0),
        (9, 7.0, 7.0),
    ];
    const RIGHT: [(u64, f64, f64); 6] = [
        (5, 9.0, 2.0),
        (4, 8.0, -3.0),
        (3, 5.0, 1.0),
        (2, 4.0, 0.0),
        (1, 2.0, 1.0),
        (12, 1.0, 1.0),
    ];

    /// Joined rows as (x, w, y, z).
    fn joined() -> Vec<[f64; 4]> {
        LEFT.iter()
            .filter_map(|(k, x, w)| {
                RIGHT
                    .iter()
                    .find(|(kr, _, _)| kr == k)
                    .map(|(_, y, z)| [*x, *w, *y, *z])
            })
            .collect()
    }

    fn inputs(study: &StudyConfig) -> HashMap<Identity, String> {
        let mut csv = split(study, 0, "id,x,w", &LEFT);
        csv.extend(split(study, 1, "id,y,z", &RIGHT));
        csv
    }

    #[test]
    fn test_moments() {
        let study = study(1, 1, 6);
        let result = match run(&study, &moments_query("skew", true), &inputs(&study)).unwrap() {
            QueryResult::Moments(m) => m,
            other => panic!("unexpected result {:?}", other),
        };
        let ys: Vec<f64> = joined().iter().map(|r| r[2]).collect();
        let n = ys.len() as f64;
        let mean = ys.iter().sum::<f64>() / n;
        let var = ys.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n;
        let skew = ys.iter().map(|y| (y - mean).powi(3)).sum::<f64>() / n / var.powf(1.5);

        let tolerance = moments_tolerance();
        assert_eq!(result.count, Some(5));
        assert!((result.mean.unwrap() - mean).abs() < tolerance, "{:?}", result);
        assert!((result.variance.unwrap() - var).abs() < tolerance, "{:?}", result);
        assert!((result.skew.unwrap() - skew).abs() < tolerance, "{:?}", result);
    }

    #[test]
    fn test_moments_hidden_count_many_owners() {
        let study = study(2, 3, 3);
        let query = moments_query("variance", false);
        let result = match run(&study, &query, &inputs(&study)).unwrap() {
            QueryResult::Moments(m) => m,
            other => panic!("unexpected result {:?}", other),
        };
        let tolerance = moments_tolerance();
        assert_eq!(result.count, None);
        assert!((result.mean.unwrap() - 5.6).abs() < tolerance, "{:?}", result);
        assert!((result.variance.unwrap() - 6.64).abs() < tolerance, "{:?}", result);
        assert_eq!(result.skew, None);
    }

    #[test]
    fn test_moments_constant_column() {
        let study = study(1, 1, 6);
        let right: Vec<(u64, f64, f64)> = RIGHT.iter().map(|(k, _, z)| (*k, 3.0, *z)).collect();
        let mut csv = split(&study, 0, "id,x,w", &LEFT);
        csv.extend(split(&study, 1, "id,y,z", &right));
        let result = match run(&study, &moments_query("skew", true), &csv).unwrap() {
            QueryResult::Moments(m) => m,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(result.count, Some(5));
        assert_eq!(result.mean, Some(3.0));
        assert_eq!(result.variance, Some(0.0));
        assert!(result.skew.unwrap().is_nan());
    }

    #[test]
    fn test_moments_empty_intersection() {
        let study = study(1, 1, 6);
        let mut csv = split(&study, 0, "id,x,w", &LEFT[..2]);
        csv.extend(split(&study, 1, "id,y,z", &RIGHT[..2]));
        let result = match run(&study, &moments_query("mean", true), &csv).unwrap() {
            QueryResult::Moments(m) => m,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(result.count, Some(0));
        assert!(result.mean.unwrap().is_nan());

        // without the count, the saturated quotient marks the empty join
        let result = match run(&study, &moments_query("skew", false), &csv).unwrap() {
            QueryResult::Moments(m) => m,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(result.count, None);
        assert!(result.mean.unwrap().is_nan());
        assert!(result.variance.unwrap().is_nan());
        assert!(result.skew.unwrap().is_nan());
    }

    /// Plaintext least squares with coefficients truncated to `bits` fractional bits.
    struct Expected {
        coefficients: Vec<f64>,
        standard_errors: Vec<f64>,
        mse: f64,
        r_squared: f64,
    }

    fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
        let n = b.len();
        for c in 0..n {
            let pivot = (c..n)
                .max_by(|&i, &j| a[i][c].abs().partial_cmp(&a[j][c].abs()).unwrap())
                .unwrap();
            a.swap(c, pivot);
            b.swap(c, pivot);
            for r in 0..n {
                if r != c {
                    let f = a[r][c] / a[c][c];
                    for k in 0..n {
                        a[r][k] -= f * a[c][k];
                    }
                    b[r] -= f * b[c];
                }
            }
        }
        (0..n).map(|i| b[i] / a[i][i]).collect()
    }

    fn ols(xs: &[Vec<f64>], ys: &[f64], intercept: bool, bits: i32) -> Expected {
        let rows: Vec<Vec<f64>> = xs
            .iter()
            .map(|x| {
                let mut row = if intercept { vec![1.0] } else { vec![] };
                row.extend(x);
                row
            })
            .collect();
        let d = rows[0].len();
        let a: Vec<Vec<f64>> = (0..d)
            .map(|i| (0..d).map(|j| rows.iter().map(|r| r[i] * r[j]).sum()).collect())
            .collect();
        let v: Vec<f64> = (0..d)
            .map(|i| rows.iter().zip(ys).map(|(r, y)| r[i] * y).sum())
            .collect();
        let scale = 2f64.powi(bits);
        let beta: Vec<f64> = solve(a.clone(), v)
            .iter()
            .map(|b| (b * scale).trunc() / scale)
            .collect();

        let sse: f64 = rows
            .iter()
            .zip(ys)
            .map(|(r, y)| (y - r.iter().zip(&beta).map(|(x, b)| x * b).sum::<f64>()).powi(2))
            .sum();
        let n = ys.len() as f64;
        let mse = sse / (n - d as f64);
        let total = if intercept {
            let mean = ys.iter().sum::<f64>() / n;
            ys.iter().map(|y| (y - mean).powi(2)).sum::<f64>()
        } else {
            ys.iter().map(|y| y * y).sum::<f64>()
        };
        let standard_errors = (0..d)
            .map(|i| {
                let mut unit = vec![0.0; d];
                unit[i] = 1.0;
                (mse * solve(a.clone(), unit)[i]).sqrt()
            })
            .collect();
        Expected {
            coefficients: beta,
            standard_errors,
            mse,
            r_squared: 1.0 - sse / total,
        }
    }

    fn check(result: &RegressionResult, expected: &Expected) {
        let tolerance = 1.0 / 16.0;
        for (got, want) in result.coefficients.iter().zip(&expected.coefficients) {
            assert!(
                (got - want).abs() < tolerance,
                "coefficients {:?}, expected {:?}",
                result.coefficients,
                expected.coefficients
            );
        }
        for (got, want) in result.standard_errors.iter().zip(&expected.standard_errors) {
            assert!(
                (got - want).abs() < 1e-2,
                "standard errors {:?}, expected {:?}",
                result.standard_errors,
                expected.standard_errors
            );
        }
        assert!(
            (result.mse - expected.mse).abs() < 1e-3,
            "mse {} expected {}",
            result.mse,
            expected.mse
        );
        assert!(
            (result.r_squared - expected.r_squared).abs() < tolerance,
            "r² {} expected {}",
            result.r_squared,
            expected.r_squared
        );
        assert!((0.0..=1.0).contains(&result.f_p_value));
        assert!(result.t_p_values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    fn regression_result(study: &StudyConfig, query: &str) -> RegressionResult {
        match run(study, query, &inputs(study)).unwrap() {
            QueryResult::Regression(r) => r,
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_simple_regression() {
        let study = study(1, 1, 6);
        let result = regression_result(&study, &regression_query(&[(0, "x")], true));
        let rows = joined();
        let xs: Vec<Vec<f64>> = rows.iter().map(|r| vec![r[0]]).collect();
        let ys: Vec<f64> = rows.iter().map(|r| r[2]).collect();
        check(&result, &ols(&xs, &ys, true, 4));
        assert_eq!(result.regressors, ["intercept", "x"]);

        // F ≈ 121 and t² ≈ 121 for the slope lie past the last columns; the
        // intercept's t² is near zero
        assert!((result.f_p_value - 0.3).abs() < 1e-3, "{:?}", result);
        assert!((result.t_p_values[1] - 0.5).abs() < 1e-3, "{:?}", result);
        assert!((result.t_p_values[0] - 0.9).abs() < 1e-3, "{:?}", result);
    }

    #[test]
    fn test_regression_across_verticals_four_owners() {
        let study = study(2, 2, 3);
        let result = regression_result(&study, &regression_query(&[(0, "x"), (1, "z")], true));
        let rows = joined();
        let xs: Vec<Vec<f64>> = rows.iter().map(|r| vec![r[0], r[3]]).collect();
        let ys: Vec<f64> = rows.iter().map(|r| r[2]).collect();
        check(&result, &ols(&xs, &ys, true, 4));
        assert_eq!(result.regressors, ["intercept", "x", "z"]);
    }

    #[test]
    fn test_regression_without_intercept_seven_owners() {
        let study = study(3, 4, 2);
        let result = regression_result(&study, &regression_query(&[(0, "x"), (0, "w")], false));
        let rows = joined();
        let xs: Vec<Vec<f64>> = rows.iter().map(|r| vec![r[0], r[1]]).collect();
        let ys: Vec<f64> = rows.iter().map(|r| r[2]).collect();
        check(&result, &ols(&xs, &ys, false, 4));
        assert_eq!(result.regressors, ["x", "w"]);
    }

    #[test]
    fn test_singular_design_fails() {
        let study = study(1, 1, 6);
        // x and 2x are collinear
        let left: Vec<(u64, f64, f64)> = LEFT.iter().map(|(k, x, _)| (*k, *x, 2.0 * x)).collect();
        let mut csv = split(&study, 0, "id,x,w", &left);
        csv.extend(split(&study, 1, "id,y,z", &RIGHT));
        let query = regression_query(&[(0, "x"), (0, "w")], true);
        assert!(run(&study, &query, &csv).is_err());
    }

    #[test]
    fn test_dispatch_rejects() {
        let study = study(1, 1, 6);
        let me = Identity::dealer(3);
        let memory = Memory { csv: None };

        let kurtosis = Query::parse(&moments_query("kurtosis", true)).unwrap();
        assert!(prepare(&memory, &kurtosis, &study, &me).is_err());
        assert!(dispatch(&memory, &kurtosis, &study, &me).is_none());

        let outside = Query::parse(&regression_query(&[(2, "x")], true)).unwrap();
        assert!(prepare(&memory, &outside, &study, &me).is_err());

        let unknown = Query::parse(&regression_query(&[(0, "height")], true)).unwrap();
        assert!(prepare(&memory, &unknown, &study, &me).is_err());

        let empty = Query::parse(&regression_query(&[], true)).unwrap();
        assert!(prepare(&memory, &empty, &study, &me).is_err());
    }

    #[test]
    fn test_roles() {
        let study = study(1, 1, 6);
        let query = Query::parse(&moments_query("mean", true)).unwrap();
        let memory = Memory { csv: None };

        let analyst = Identity::new(5, Role::Analyst, 0);
        assert!(prepare(&memory, &query, &study, &analyst).unwrap().is_none());

        let recipient = prepare(&memory, &query, &study, &Identity::recipient(4)).unwrap().unwrap();
        assert!(recipient.yields_result);
        assert_eq!(recipient.peers.num_data_owners(), 2);
        assert_eq!(recipient.instance, InstanceId::root("moments-mean"));

        // a data owner without its file cannot start
        let owner = Identity::data_owner(100, 0);
        assert!(prepare(&memory, &query, &study, &owner).is_err());
    }
}
