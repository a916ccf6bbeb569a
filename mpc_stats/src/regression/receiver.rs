use mpc::{
    arith::mod_add,
    wire::MessageReader,
    Actions, Context, Event, Fronctocol, Identity, ProtocolError,
};
use num_bigint::BigUint;
use tracing::{debug, info};

use super::{RegressionInfo, RegressionResult};
use crate::{
    fixed_point::{bytes_to_fraction, decode},
    startup::QueryResult,
};

/// Recipient root of a regression query. Sums the data owners' field shares,
/// XORs their table cells and completes with [`QueryResult::Regression`].
pub struct RegressionReceiver {
    info: RegressionInfo,
    sums: Vec<BigUint>,
    cells: Option<Vec<Vec<u8>>>,
    received: Vec<Identity>,
}

impl RegressionReceiver {
    pub fn new(info: RegressionInfo) -> Self {
        let len = info.result_len();
        Self {
            info,
            sums: vec![BigUint::default(); len],
            cells: None,
            received: Vec::new(),
        }
    }

    fn absorb(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let p = &self.info.end_modulus;
        let d = self.info.dim();
        let mut r = MessageReader::new(payload);
        let shares = r.read_elems(p)?;
        let cells = (0..=d).map(|_| r.read_bytes()).collect::<Result<Vec<_>, _>>()?;
        r.finish()?;
        if shares.len() != self.sums.len() {
            return Err(ProtocolError::Invalid(format!(
                "expected {} regression shares, got {}",
                self.sums.len(),
                shares.len()
            )));
        }
        for (acc, x) in self.sums.iter_mut().zip(&shares) {
            *acc = mod_add(acc, x, p);
        }

        match &mut self.cells {
            None => self.cells = Some(cells),
            Some(acc) => {
                for (acc, cell) in acc.iter_mut().zip(&cells) {
                    if acc.len() != cell.len() {
                        return Err(ProtocolError::Invalid(format!(
                            "table cell of {} bytes, expected {}",
                            cell.len(),
                            acc.len()
                        )));
                    }
                    acc.iter_mut().zip(cell).for_each(|(a, b)| *a ^= b);
                }
            }
        }
        Ok(())
    }

    fn result(&self) -> RegressionResult {
        let p = &self.info.end_modulus;
        let b = self.info.bits;
        let d = self.info.dim();
        let coefficients = self.sums[..d].iter().map(|x| decode(x, b, p)).collect();
        let mse = decode(&self.sums[d], 5 * b, p);
        let r_squared = decode(&self.sums[d + 1], b, p);
        let standard_errors = self.sums[d + 2..]
            .iter()
            .map(|x| decode(x, 4 * b, p).max(0.0).sqrt())
            .collect();

        let cells = self.cells.as_deref().unwrap_or_default();
        let f_p_value = cells.first().map_or(f64::NAN, |c| bytes_to_fraction(c));
        // the t table holds one-sided tail probabilities
        let t_p_values = cells
            .iter()
            .skip(1)
            .map(|c| (2.0 * bytes_to_fraction(c)).min(1.0))
            .collect();

        RegressionResult {
            regressors: self.info.names.clone(),
            coefficients,
            standard_errors,
            t_p_values,
            mse,
            r_squared,
            f_p_value,
        }
    }
}

impl Fronctocol for RegressionReceiver {
    fn name(&self) -> &'static str {
        "RegressionReceiver"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init if ctx.peers.num_data_owners() == 0 => {
                Err(ProtocolError::missing(ctx.peers, "data owner"))
            }
            Event::Init => Ok(Actions::none()),
            Event::Receive { from, payload } => {
                if !from.is_data_owner()
                    || !ctx.peers.contains(&from)
                    || self.received.contains(&from)
                {
                    return Err(ProtocolError::UnexpectedSender {
                        fronctocol: self.name(),
                        from,
                    });
                }
                self.absorb(&payload)?;
                self.received.push(from);
                debug!(%from, "regression shares received");
                if self.received.len() < ctx.peers.num_data_owners() {
                    return Ok(Actions::none());
                }
                let result = self.result();
                info!(?result, "regression result");
                Ok(Actions::completed(QueryResult::Regression(result)))
            }
            event => Err(ProtocolError::unexpected(self.name(), self.received.len(), &event)),
        }
    }
}
