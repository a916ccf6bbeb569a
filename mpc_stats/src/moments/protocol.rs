use mpc::{
    arith::{mod_mul, pow2},
    protocols::{
        divide::{DivideStepRandomness, SignedDivide, SignedDivideRandomness},
        modconv::{ModConvUp, ModConvUpRandomness},
    },
    wire::MessageWriter,
    Actions, Context, Event, Fronctocol, Output, ProtocolError,
};
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use super::MomentsInfo;
use crate::{
    house::{computing_peers, Delivery},
    join::{JoinRow, PairwiseJoin},
};

const RANDOMNESS_TAG: usize = 0;
const JOIN_TAG: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingRandomnessAndJoin,
    AwaitingModConvUp,
    AwaitingDivide,
}

/// Data-owner root of a moments query. Sends its shares of the count and the
/// scaled `E[X^k]` to the recipients and completes with `()`.
pub struct Moments {
    info: MomentsInfo,
    rows: Vec<JoinRow>,
    delivery: Option<Delivery>,
    sums: Option<Vec<BigUint>>,
    count: BigUint,
    state: State,
}

impl Moments {
    pub fn new(info: MomentsInfo, rows: Vec<JoinRow>) -> Self {
        Self {
            info,
            rows,
            delivery: None,
            sums: None,
            count: BigUint::default(),
            state: State::Init,
        }
    }

    fn delivery(&mut self) -> Result<&mut Delivery, ProtocolError> {
        self.delivery
            .as_mut()
            .ok_or_else(|| ProtocolError::Invalid("moments randomness missing".to_string()))
    }

    fn finish(&self, ctx: &Context<'_>, moments: Vec<BigUint>) -> Actions {
        let mut values = Vec::with_capacity(self.info.result_len());
        if self.info.reveal_count {
            values.push(self.count.clone());
        }
        values.extend(moments);

        let mut w = MessageWriter::new();
        w.write_elems(&values, &self.info.end_modulus);
        let recipients = ctx.peers.recipients();
        if recipients.is_empty() {
            warn!("moments query has no recipient");
        }
        debug!(values = values.len(), recipients = recipients.len(), "sending moments");
        let mut actions = Actions::none();
        actions
            .broadcast(recipients.iter().copied(), w.into_bytes())
            .complete(());
        actions
    }
}

impl Fronctocol for Moments {
    fn name(&self) -> &'static str {
        "Moments"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (State::Init, Event::Init) => {
                info!(
                    start_modulus = %self.info.start_modulus,
                    end_modulus = %self.info.end_modulus,
                    key_modulus = %self.info.join.key_modulus(),
                    highest_moment = self.info.highest_moment,
                    "moments query"
                );
                let peers = computing_peers(ctx.peers);
                let join = PairwiseJoin::new(
                    self.info.join.clone(),
                    self.info.factory(),
                    std::mem::take(&mut self.rows),
                );
                let mut actions = Actions::none();
                actions
                    .invoke_tagged(
                        Box::new(self.info.randomness_order().patrons()),
                        peers.clone(),
                        RANDOMNESS_TAG,
                    )
                    .invoke_tagged(Box::new(join), peers, JOIN_TAG);
                self.state = State::AwaitingRandomnessAndJoin;
                Ok(actions)
            }
            (State::AwaitingRandomnessAndJoin, Event::Complete(completion)) => {
                match completion.tag {
                    RANDOMNESS_TAG => {
                        self.delivery = Some(Delivery::new(completion.output::<Vec<Output>>()?))
                    }
                    _ => self.sums = Some(completion.output::<Vec<BigUint>>()?),
                }
                let sums = match (&self.delivery, self.sums.take()) {
                    (Some(_), Some(sums)) => sums,
                    (_, sums) => {
                        self.sums = sums;
                        return Ok(Actions::none());
                    }
                };
                debug!("join complete");
                let randomness = self.delivery()?.next::<ModConvUpRandomness>()?.into_vec();
                self.state = State::AwaitingModConvUp;
                Ok(Actions::invoked(
                    ModConvUp::new(&self.info.modconv, sums, randomness),
                    ctx.peers.data_owners_only(),
                ))
            }
            (State::AwaitingModConvUp, Event::Complete(completion)) => {
                let mut converted = completion.output::<Vec<BigUint>>()?.into_iter();
                self.count = converted
                    .next()
                    .ok_or_else(|| {
                        ProtocolError::Invalid("moments join produced no count".to_string())
                    })?;
                let h = self.info.highest_moment;
                if h == 0 {
                    return Ok(self.finish(ctx, Vec::new()));
                }

                let p = &self.info.end_modulus;
                let scale = pow2(self.info.guard_bits);
                let numerators: Vec<BigUint> = converted.map(|s| mod_mul(&s, &scale, p)).collect();
                let denominators = vec![self.count.clone(); h];
                let delivery = self.delivery()?;
                let signs = delivery.next::<SignedDivideRandomness>()?.into_vec();
                let steps = delivery.next::<DivideStepRandomness>()?.into_vec();
                self.state = State::AwaitingDivide;
                Ok(Actions::invoked(
                    SignedDivide::new(
                        &self.info.divide,
                        self.info.quotient_bits,
                        numerators,
                        denominators,
                        signs,
                        steps,
                    ),
                    ctx.peers.data_owners_only(),
                ))
            }
            (State::AwaitingDivide, Event::Complete(completion)) => {
                let moments = completion.output::<Vec<BigUint>>()?;
                Ok(self.finish(ctx, moments))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}
