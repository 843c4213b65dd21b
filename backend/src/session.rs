//! Drives one purchase session through the protocol state machine.

use crate::aggregate::{combine, round4};
use crate::config::Config;
use crate::errors::ExchangeError;
use crate::ledger::Ledger;
use crate::models::{
    AggregationResult, Amount, Balances, Contribution, ErrorReport, ProviderEndpoint, QueryMode, QueryRequest,
    SessionReport,
};
use crate::noise::LaplaceMechanism;
use crate::protocol::{transition, Event, QuorumPolicy, SessionState, Terms};
use crate::provider::{collect, ProviderClient};
use crate::settlement;
use paillier::constants::DEFAULT_KEY_BITS;
use paillier::{KeyPair, PrivateKey};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one session needs. Nothing is shared between sessions except the ledger.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub requestor: String,
    pub condition: String,
    pub mode: QueryMode,
    pub providers: Vec<ProviderEndpoint>,
    pub price_per_provider: Amount,
    pub quorum: QuorumPolicy,
    pub noise: LaplaceMechanism,
    pub key_bits: u64,
    pub round_timeout: Duration,
}

impl SessionContext {
    pub fn new(
        requestor: impl Into<String>,
        condition: impl Into<String>,
        providers: Vec<ProviderEndpoint>,
        price_per_provider: Amount,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            requestor: requestor.into(),
            condition: condition.into(),
            mode: QueryMode::Plain,
            providers,
            price_per_provider,
            quorum: QuorumPolicy::All,
            noise: LaplaceMechanism::default(),
            key_bits: DEFAULT_KEY_BITS,
            round_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &Config, condition: &str, mode: QueryMode) -> Result<Self, ExchangeError> {
        if condition.trim().is_empty() {
            return Err(ExchangeError::Config("condition must not be empty".to_string()));
        }
        Ok(Self {
            mode,
            quorum: config.exchange.quorum,
            noise: LaplaceMechanism::new(config.privacy.epsilon, config.privacy.sensitivity)?,
            key_bits: config.exchange.key_bits,
            round_timeout: config.exchange.round_timeout(),
            ..Self::new(
                config.exchange.requestor.clone(),
                condition,
                config.providers.clone(),
                config.exchange.price(),
            )
        })
    }

    /// The balance check covers every configured provider, not only those that end up answering.
    pub fn terms(&self) -> Terms {
        Terms {
            required_balance: self
                .price_per_provider
                .saturating_mul(self.providers.len() as Amount),
            required_responses: self.quorum.required(self.providers.len()),
        }
    }
}

fn advance(ctx: &SessionContext, state: SessionState, event: Event, terms: &Terms) -> Result<SessionState, ExchangeError> {
    let from = state.name();
    match transition(state, event, terms) {
        SessionState::Aborted { error } => {
            warn!(
                session_id = %ctx.session_id,
                from,
                code = error.code(),
                error = %error,
                "session aborted"
            );
            Err(error)
        }
        next => {
            info!(session_id = %ctx.session_id, from, to = next.name(), "session advanced");
            Ok(next)
        }
    }
}

/// Abort from outside the normal flow, e.g. when key generation fails.
fn abort(ctx: &SessionContext, state: SessionState, error: ExchangeError, terms: &Terms) -> ExchangeError {
    match advance(ctx, state, Event::Aborted(error), terms) {
        Err(error) => error,
        Ok(state) => ExchangeError::Protocol(format!("abort not accepted in state {}", state.name())),
    }
}

async fn generate_keys(bits: u64) -> Result<KeyPair, ExchangeError> {
    tokio::task::spawn_blocking(move || KeyPair::generate(bits, &mut OsRng))
        .await
        .map_err(|e| ExchangeError::Internal(format!("key generation task: {e}")))?
        .map_err(ExchangeError::from)
}

fn aggregate(
    noise: &LaplaceMechanism,
    contributions: &[Contribution],
    key: Option<&PrivateKey>,
) -> Result<AggregationResult, ExchangeError> {
    let combined = combine(contributions, key)?;
    let noisy = noise.perturb(combined, &mut OsRng);
    Ok(AggregationResult {
        combined: round4(combined),
        noisy: round4(noisy),
        sources: contributions.len(),
    })
}

/// Run one session to completion.
///
/// No transfer is attempted unless the balance check, the query round and aggregation all
/// succeeded, and only providers whose data was used are paid.
pub async fn run(ctx: &SessionContext, ledger: &dyn Ledger, client: &dyn ProviderClient) -> Result<SessionReport, ExchangeError> {
    let terms = ctx.terms();
    info!(
        session_id = %ctx.session_id,
        requestor = %ctx.requestor,
        condition = %ctx.condition,
        mode = ?ctx.mode,
        providers = ctx.providers.len(),
        "session started"
    );

    let mut state = SessionState::Init;

    let event = match ledger.balance(&ctx.requestor).await {
        Ok(available) => Event::BalanceObserved { available },
        Err(e) => Event::Aborted(e.into()),
    };
    state = advance(ctx, state, event, &terms)?;

    // Session-scoped keys; dropped as soon as the totals are decrypted.
    let keys = match ctx.mode {
        QueryMode::Plain => None,
        QueryMode::Encrypted => match generate_keys(ctx.key_bits).await {
            Ok(keys) => Some(keys),
            Err(e) => return Err(abort(ctx, state, e, &terms)),
        },
    };

    let request = match &keys {
        Some(keys) => QueryRequest::Encrypted {
            condition: ctx.condition.clone(),
            public_key: keys.public.clone(),
        },
        None => QueryRequest::Plain {
            condition: ctx.condition.clone(),
        },
    };

    let round = collect(client, &ctx.providers, &request, ctx.round_timeout).await;
    info!(
        session_id = %ctx.session_id,
        responded = round.contributions.len(),
        unavailable = round.unavailable.len(),
        "query round finished"
    );
    state = advance(
        ctx,
        state,
        Event::ResponsesCollected {
            contributions: round.contributions,
            unavailable: round.unavailable,
        },
        &terms,
    )?;

    let outcome = match &state {
        SessionState::DataCollected { contributions, .. } => {
            aggregate(&ctx.noise, contributions, keys.as_ref().map(|k| &k.private))
        }
        other => Err(ExchangeError::Protocol(format!("cannot aggregate in state {}", other.name()))),
    };
    drop(keys);
    state = advance(ctx, state, Event::Aggregated(outcome), &terms)?;

    let records = match &state {
        SessionState::Aggregated { payees, .. } => {
            settlement::plan(ctx.session_id, payees, ctx.price_per_provider)
        }
        _ => Vec::new(),
    };
    // The plan is durable before any money moves, so an interrupted settlement can be finished later.
    if let Err(e) = ledger.record_plan(ctx.session_id, &records).await {
        return Err(abort(ctx, state, e.into(), &terms));
    }
    let event = match settlement::settle(ledger, &ctx.requestor, records).await {
        Ok(settlements) => Event::SettlementCompleted { settlements },
        Err(failure) => Event::SettlementFailed {
            provider: failure.provider,
            reason: failure.reason,
            settlements: failure.settlements,
        },
    };
    state = advance(ctx, state, event, &terms)?;

    let SessionState::Settled { result, settlements } = state else {
        return Err(ExchangeError::Protocol(format!("session ended in state {}", state.name())));
    };

    let balances = observe_balances(ctx, ledger).await;

    Ok(SessionReport {
        session_id: ctx.session_id,
        requestor: ctx.requestor.clone(),
        condition: ctx.condition.clone(),
        mode: ctx.mode,
        combined_statistic: result.combined,
        noisy_statistic: result.noisy,
        sources: result.sources,
        settlements,
        balances,
    })
}

/// Report for a session whose future was dropped before it finished.
///
/// Lists every planned payment with its ledger status, so the payments still owed show up as
/// pending. If the ledger cannot be read the report says so and lists nothing.
pub async fn interrupted_report(ctx: &SessionContext, ledger: &dyn Ledger) -> ErrorReport {
    let (message, settlements) = match settlement::progress(ledger, ctx.session_id).await {
        Ok(records) => ("session interrupted before completion".to_string(), records),
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "could not read settlement progress");
            (format!("session interrupted before completion; settlement progress unknown: {e}"), Vec::new())
        }
    };

    ErrorReport {
        session_id: ctx.session_id,
        requestor: ctx.requestor.clone(),
        condition: ctx.condition.clone(),
        error: "interrupted".to_string(),
        message,
        settlements,
    }
}

async fn observe_balances(ctx: &SessionContext, ledger: &dyn Ledger) -> Option<Balances> {
    let read = async {
        let requestor = ledger.balance(&ctx.requestor).await?;
        let mut providers = BTreeMap::new();
        for p in &ctx.providers {
            providers.insert(p.name.clone(), ledger.balance(&p.account).await?);
        }
        Ok::<_, crate::ledger::LedgerError>(Balances { requestor, providers })
    };

    match read.await {
        Ok(balances) => Some(balances),
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "could not read balances after settlement");
            None
        }
    }
}
