//! Purchase session state machine.
//!
//! ```text
//! Init -> BalanceChecked -> DataCollected -> Aggregated -> Settled
//!   \____________\_______________\______________\______-> Aborted
//! ```
//!
//! [`transition`] is pure: the session driver performs the I/O and reports what happened as an
//! [`Event`]. Any event the current state does not accept aborts the session.

use crate::errors::ExchangeError;
use crate::models::{AggregationResult, Amount, Contribution, ProviderEndpoint, SettlementRecord};
use serde::{Deserialize, Serialize};

/// How many valid provider responses a session needs before it may aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuorumPolicy {
    /// Every configured provider must respond.
    #[default]
    All,
    AtLeast(usize),
}

impl QuorumPolicy {
    pub fn required(&self, configured: usize) -> usize {
        match self {
            QuorumPolicy::All => configured,
            QuorumPolicy::AtLeast(k) => *k,
        }
    }
}

/// Fixed parameters a session is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terms {
    pub required_balance: Amount,
    pub required_responses: usize,
}

#[derive(Debug)]
pub enum SessionState {
    Init,
    BalanceChecked {
        available: Amount,
    },
    DataCollected {
        contributions: Vec<Contribution>,
        /// `(provider, reason)` for every provider dropped from the round.
        unavailable: Vec<(String, String)>,
    },
    Aggregated {
        result: AggregationResult,
        payees: Vec<ProviderEndpoint>,
    },
    Settled {
        result: AggregationResult,
        settlements: Vec<SettlementRecord>,
    },
    Aborted {
        error: ExchangeError,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::BalanceChecked { .. } => "balance_checked",
            SessionState::DataCollected { .. } => "data_collected",
            SessionState::Aggregated { .. } => "aggregated",
            SessionState::Settled { .. } => "settled",
            SessionState::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Settled { .. } | SessionState::Aborted { .. })
    }
}

#[derive(Debug)]
pub enum Event {
    BalanceObserved {
        available: Amount,
    },
    ResponsesCollected {
        contributions: Vec<Contribution>,
        unavailable: Vec<(String, String)>,
    },
    Aggregated(Result<AggregationResult, ExchangeError>),
    SettlementCompleted {
        settlements: Vec<SettlementRecord>,
    },
    SettlementFailed {
        provider: String,
        reason: String,
        settlements: Vec<SettlementRecord>,
    },
    /// Failure outside the normal flow, e.g. key generation or a ledger read.
    Aborted(ExchangeError),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::BalanceObserved { .. } => "balance_observed",
            Event::ResponsesCollected { .. } => "responses_collected",
            Event::Aggregated(_) => "aggregated",
            Event::SettlementCompleted { .. } => "settlement_completed",
            Event::SettlementFailed { .. } => "settlement_failed",
            Event::Aborted(_) => "aborted",
        }
    }
}

fn abort(error: ExchangeError) -> SessionState {
    SessionState::Aborted { error }
}

pub fn transition(state: SessionState, event: Event, terms: &Terms) -> SessionState {
    match (state, event) {
        (state, _) if state.is_terminal() => state,

        (_, Event::Aborted(error)) => abort(error),

        (SessionState::Init, Event::BalanceObserved { available }) => {
            if available < terms.required_balance {
                abort(ExchangeError::InsufficientFunds {
                    required: terms.required_balance,
                    available,
                })
            } else {
                SessionState::BalanceChecked { available }
            }
        }

        (
            SessionState::BalanceChecked { .. },
            Event::ResponsesCollected {
                contributions,
                unavailable,
            },
        ) => {
            if contributions.len() < terms.required_responses {
                abort(ExchangeError::QuorumNotMet {
                    required: terms.required_responses,
                    received: contributions.len(),
                })
            } else {
                SessionState::DataCollected {
                    contributions,
                    unavailable,
                }
            }
        }

        (SessionState::DataCollected { contributions, .. }, Event::Aggregated(outcome)) => match outcome {
            Ok(result) => SessionState::Aggregated {
                result,
                payees: contributions.into_iter().map(|c| c.provider).collect(),
            },
            Err(error) => abort(error),
        },

        (SessionState::Aggregated { result, payees }, Event::SettlementCompleted { settlements }) => {
            let unpaid: Vec<&str> = payees
                .iter()
                .filter(|p| !settlements.iter().any(|s| s.provider == p.name && s.is_confirmed()))
                .map(|p| p.name.as_str())
                .collect();

            if unpaid.is_empty() {
                SessionState::Settled { result, settlements }
            } else {
                abort(ExchangeError::Protocol(format!(
                    "settlement reported complete with unpaid providers: {}",
                    unpaid.join(", ")
                )))
            }
        }

        (
            SessionState::Aggregated { .. },
            Event::SettlementFailed {
                provider,
                reason,
                settlements,
            },
        ) => abort(ExchangeError::LedgerTransfer {
            provider,
            reason,
            settlements,
        }),

        (state, event) => abort(ExchangeError::Protocol(format!(
            "event {} not accepted in state {}",
            event.name(),
            state.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderResponse, SettlementStatus};

    const TERMS: Terms = Terms {
        required_balance: 20,
        required_responses: 2,
    };

    fn endpoint(name: &str) -> ProviderEndpoint {
        ProviderEndpoint {
            name: name.to_string(),
            url: format!("http://{name}.invalid"),
            account: format!("acct-{name}"),
        }
    }

    fn contribution(name: &str, v: f64) -> Contribution {
        Contribution {
            provider: endpoint(name),
            response: ProviderResponse::Statistic(v),
        }
    }

    fn result() -> AggregationResult {
        AggregationResult {
            combined: 42.0,
            noisy: 42.5,
            sources: 2,
        }
    }

    fn confirmed(name: &str) -> SettlementRecord {
        let mut record = SettlementRecord::pending(&endpoint(name), 10, format!("s:{name}"));
        record.status = SettlementStatus::Confirmed;
        record
    }

    fn aggregated() -> SessionState {
        SessionState::Aggregated {
            result: result(),
            payees: vec![endpoint("a"), endpoint("b")],
        }
    }

    #[test]
    fn happy_path_reaches_settled() {
        let s = transition(SessionState::Init, Event::BalanceObserved { available: 20 }, &TERMS);
        assert_eq!(s.name(), "balance_checked");

        let s = transition(
            s,
            Event::ResponsesCollected {
                contributions: vec![contribution("a", 40.0), contribution("b", 44.0)],
                unavailable: vec![],
            },
            &TERMS,
        );
        assert_eq!(s.name(), "data_collected");

        let s = transition(s, Event::Aggregated(Ok(result())), &TERMS);
        let SessionState::Aggregated { payees, .. } = &s else {
            panic!("expected aggregated, got {}", s.name());
        };
        assert_eq!(payees.len(), 2);

        let s = transition(
            s,
            Event::SettlementCompleted {
                settlements: vec![confirmed("a"), confirmed("b")],
            },
            &TERMS,
        );
        assert!(matches!(s, SessionState::Settled { ref settlements, .. } if settlements.len() == 2));
        assert!(s.is_terminal());
    }

    #[test]
    fn low_balance_aborts_with_insufficient_funds() {
        let s = transition(SessionState::Init, Event::BalanceObserved { available: 19 }, &TERMS);
        assert!(matches!(
            s,
            SessionState::Aborted {
                error: ExchangeError::InsufficientFunds {
                    required: 20,
                    available: 19
                }
            }
        ));
    }

    #[test]
    fn missing_responses_abort_with_quorum_not_met() {
        let s = transition(
            SessionState::BalanceChecked { available: 20 },
            Event::ResponsesCollected {
                contributions: vec![contribution("a", 40.0)],
                unavailable: vec![("b".to_string(), "timeout".to_string())],
            },
            &TERMS,
        );
        assert!(matches!(
            s,
            SessionState::Aborted {
                error: ExchangeError::QuorumNotMet {
                    required: 2,
                    received: 1
                }
            }
        ));
    }

    #[test]
    fn relaxed_quorum_accepts_partial_rounds() {
        let terms = Terms {
            required_responses: QuorumPolicy::AtLeast(1).required(2),
            ..TERMS
        };
        let s = transition(
            SessionState::BalanceChecked { available: 20 },
            Event::ResponsesCollected {
                contributions: vec![contribution("a", 40.0)],
                unavailable: vec![("b".to_string(), "timeout".to_string())],
            },
            &terms,
        );
        assert_eq!(s.name(), "data_collected");
    }

    #[test]
    fn aggregation_failure_aborts() {
        let s = transition(
            SessionState::DataCollected {
                contributions: vec![contribution("a", 40.0)],
                unavailable: vec![],
            },
            Event::Aggregated(Err(ExchangeError::NoRecords)),
            &TERMS,
        );
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::NoRecords }));
    }

    #[test]
    fn failed_transfer_carries_settlement_records() {
        let pending = SettlementRecord::pending(&endpoint("b"), 10, "s:b".to_string());

        let s = transition(
            aggregated(),
            Event::SettlementFailed {
                provider: "b".to_string(),
                reason: "ledger down".to_string(),
                settlements: vec![confirmed("a"), pending],
            },
            &TERMS,
        );
        let SessionState::Aborted { error } = s else {
            panic!("expected abort");
        };
        assert_eq!(error.code(), "ledger_transfer");
        assert_eq!(error.settlements().len(), 2);
        assert!(error.settlements()[0].is_confirmed());
        assert!(!error.settlements()[1].is_confirmed());
    }

    #[test]
    fn completion_with_unpaid_provider_is_a_protocol_error() {
        let s = transition(
            aggregated(),
            Event::SettlementCompleted {
                settlements: vec![confirmed("a")],
            },
            &TERMS,
        );
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::Protocol(_) }));
    }

    #[test]
    fn out_of_order_events_abort() {
        let s = transition(SessionState::Init, Event::Aggregated(Ok(result())), &TERMS);
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::Protocol(_) }));

        let s = transition(
            SessionState::BalanceChecked { available: 20 },
            Event::SettlementCompleted { settlements: vec![] },
            &TERMS,
        );
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::Protocol(_) }));
    }

    #[test]
    fn external_abort_and_terminal_states() {
        let s = transition(
            SessionState::BalanceChecked { available: 20 },
            Event::Aborted(ExchangeError::Internal("keygen task".to_string())),
            &TERMS,
        );
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::Internal(_) }));

        // Terminal states absorb further events.
        let s = transition(s, Event::BalanceObserved { available: 100 }, &TERMS);
        assert!(matches!(s, SessionState::Aborted { error: ExchangeError::Internal(_) }));
    }

    #[test]
    fn quorum_policy_parses_from_toml_values() {
        #[derive(Deserialize)]
        struct Wrap {
            quorum: QuorumPolicy,
        }
        let all: Wrap = toml::from_str(r#"quorum = "all""#).unwrap();
        assert_eq!(all.quorum, QuorumPolicy::All);
        let k: Wrap = toml::from_str(r#"quorum = { at-least = 2 }"#).unwrap();
        assert_eq!(k.quorum, QuorumPolicy::AtLeast(2));
        assert_eq!(QuorumPolicy::All.required(3), 3);
    }
}
