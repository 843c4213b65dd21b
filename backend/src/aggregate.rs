use crate::errors::ExchangeError;
use crate::models::{Contribution, ProviderResponse};
use num_traits::{ToPrimitive, Zero};
use paillier::{Ciphertext, PrivateKey};

/// Combine validated provider responses into one statistic.
///
/// Plain responses are averaged without weighting, so providers with few matching records count
/// as much as large ones. Encrypted responses are summed homomorphically and only the totals are
/// decrypted, giving the record-weighted mean. The key is required for encrypted responses.
pub fn combine(contributions: &[Contribution], key: Option<&PrivateKey>) -> Result<f64, ExchangeError> {
    let Some(first) = contributions.first() else {
        return Err(ExchangeError::NoRecords);
    };

    match first.response {
        ProviderResponse::Statistic(_) => combine_plain(contributions),
        ProviderResponse::Encrypted { .. } => {
            let key = key.ok_or_else(|| {
                ExchangeError::Protocol("encrypted responses without a session key".to_string())
            })?;
            combine_encrypted(contributions, key)
        }
    }
}

fn combine_plain(contributions: &[Contribution]) -> Result<f64, ExchangeError> {
    let mut total = 0.0;
    for c in contributions {
        match c.response {
            ProviderResponse::Statistic(v) => total += v,
            ProviderResponse::Encrypted { .. } => return Err(mixed_modes(&c.provider.name)),
        }
    }
    Ok(total / contributions.len() as f64)
}

fn combine_encrypted(contributions: &[Contribution], key: &PrivateKey) -> Result<f64, ExchangeError> {
    let mut sums: Vec<&Ciphertext> = Vec::with_capacity(contributions.len());
    let mut counts: Vec<&Ciphertext> = Vec::with_capacity(contributions.len());
    for c in contributions {
        match &c.response {
            ProviderResponse::Encrypted { sum, count } => {
                sums.push(sum);
                counts.push(count);
            }
            ProviderResponse::Statistic(_) => return Err(mixed_modes(&c.provider.name)),
        }
    }

    let pk = key.public_key();
    let total_sum = key.decrypt(&pk.sum(sums))?;
    let total_count = key.decrypt(&pk.sum(counts))?;

    if total_count.is_zero() {
        return Err(ExchangeError::NoRecords);
    }

    let sum = total_sum
        .to_f64()
        .ok_or_else(|| ExchangeError::Internal("decrypted sum out of range".to_string()))?;
    let count = total_count
        .to_f64()
        .ok_or_else(|| ExchangeError::Internal("decrypted count out of range".to_string()))?;

    Ok(sum / count)
}

fn mixed_modes(provider: &str) -> ExchangeError {
    ExchangeError::Protocol(format!("response from {provider} does not match the session mode"))
}

/// Round for reporting.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
