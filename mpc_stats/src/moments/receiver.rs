use mpc::{
    arith::{mod_add, to_signed},
    wire::MessageReader,
    Actions, Context, Event, Fronctocol, Identity, ProtocolError,
};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use tracing::{debug, info};

use super::{MomentsInfo, MomentsResult};
use crate::{fixed_point::decode, startup::QueryResult};

/// Recipient root of a moments query: combines the data owners' shares.
/// Completes with [`QueryResult::Moments`].
pub struct MomentsReceiver {
    info: MomentsInfo,
    sums: Vec<BigUint>,
    received: Vec<Identity>,
}

impl MomentsReceiver {
    pub fn new(info: MomentsInfo) -> Self {
        let len = info.result_len();
        Self {
            info,
            sums: vec![BigUint::default(); len],
            received: Vec::new(),
        }
    }

    fn result(&self) -> MomentsResult {
        let p = &self.info.end_modulus;
        let mut values = self.sums.iter();
        let count = if self.info.reveal_count {
            values.next().and_then(|c| to_signed(c, p).to_u64())
        } else {
            None
        };
        let expectations: Vec<f64> = values
            .enumerate()
            .map(|(i, e)| decode(e, self.info.expectation_bits(i + 1), p))
            .collect();

        // a division by an empty count saturates far outside the value range
        let empty = count == Some(0)
            || expectations
                .first()
                .map_or(false, |mean| mean.abs() >= 2f64.powi(self.info.value_bits as i32));
        let moment = |k: usize| {
            expectations
                .get(k - 1)
                .map(|e| if empty { f64::NAN } else { *e })
        };

        let mean = moment(1);
        let variance = moment(2).zip(mean).map(|(e2, m)| e2 - m * m);
        let skew = moment(3).zip(mean).zip(variance).map(|((e3, m), var)| {
            if var > 0.0 {
                (e3 - 3.0 * m * var - m * m * m) / var.powf(1.5)
            } else {
                f64::NAN
            }
        });
        MomentsResult {
            count,
            mean,
            variance,
            skew,
        }
    }
}

impl Fronctocol for MomentsReceiver {
    fn name(&self) -> &'static str {
        "MomentsReceiver"
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
                let p = &self.info.end_modulus;
                let mut r = MessageReader::new(&payload);
                let shares = r.read_elems(p)?;
                r.finish()?;
                if shares.len() != self.sums.len() {
                    return Err(ProtocolError::Invalid(format!(
                        "expected {} moment shares, got {}",
                        self.sums.len(),
                        shares.len()
                    )));
                }
                for (acc, x) in self.sums.iter_mut().zip(&shares) {
                    *acc = mod_add(acc, x, p);
                }
                self.received.push(from);
                debug!(%from, "moment shares received");
                if self.received.len() < ctx.peers.num_data_owners() {
                    return Ok(Actions::none());
                }
                let result = self.result();
                info!(?result, "moments result");
                Ok(Actions::completed(QueryResult::Moments(result)))
            }
            event => Err(ProtocolError::unexpected(self.name(), self.received.len(), &event)),
        }
    }
}
