//! Identity resolution from handshake credentials.
//!
//! The relay trusts whatever identity a client claims. A credential is a JSON
//! object `{"userId": "...", "username": "..."}`; anything else, including no
//! credential at all, yields a generated anonymous identity. Resolution never
//! fails.

use parlor_proto::UserId;
use serde::Deserialize;

use crate::env::Environment;

/// Length of the random base-36 suffix on generated ids.
const ANONYMOUS_SUFFIX_LEN: usize = 9;

/// Display-name suffixes are drawn from `0..NAME_SUFFIX_RANGE`.
const NAME_SUFFIX_RANGE: u64 = 1000;

/// Resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable id used for presence and reconnection
    pub user_id: UserId,
    /// Display name
    pub username: String,
}

/// How an identity was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Both fields taken from the claim
    Claimed,
    /// Claim decoded but a field was missing and got a generated value
    PartiallyClaimed,
    /// No usable claim; identity fully generated
    Anonymous,
}

#[derive(Deserialize)]
struct Claim {
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Derives identities from raw credentials.
///
/// Stateless apart from the environment used for fallback randomness and
/// timestamps.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve a credential into an identity. Never fails.
    pub fn resolve<E: Environment>(
        &self,
        credential: Option<&[u8]>,
        env: &E,
    ) -> (Identity, IdentitySource) {
        let claim = credential.and_then(|bytes| serde_json::from_slice::<Claim>(bytes).ok());

        let Some(claim) = claim else {
            let identity = Identity {
                user_id: generated_user_id(env),
                username: format!("Anonymous{}", env.random_below(NAME_SUFFIX_RANGE)),
            };
            tracing::debug!(user_id = %identity.user_id, "no usable credential, generated identity");
            return (identity, IdentitySource::Anonymous);
        };

        let user_id = non_blank(claim.user_id);
        let username = non_blank(claim.username);
        let source = if user_id.is_some() && username.is_some() {
            IdentitySource::Claimed
        } else {
            IdentitySource::PartiallyClaimed
        };

        let identity = Identity {
            user_id: user_id.map_or_else(|| generated_user_id(env), UserId::new),
            username: username
                .unwrap_or_else(|| format!("User{}", env.random_below(NAME_SUFFIX_RANGE))),
        };

        if source == IdentitySource::PartiallyClaimed {
            tracing::debug!(user_id = %identity.user_id, "credential incomplete, filled defaults");
        }

        (identity, source)
    }
}

fn non_blank(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

/// `user_<unix-millis>_<suffix>`; the suffix separates ids minted in the
/// same millisecond.
fn generated_user_id<E: Environment>(env: &E) -> UserId {
    UserId::new(format!("user_{}_{}", env.wall_clock_millis(), base36_suffix(env)))
}

fn base36_suffix<E: Environment>(env: &E) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut bytes = [0u8; ANONYMOUS_SUFFIX_LEN];
    env.random_bytes(&mut bytes);
    bytes.iter().map(|b| char::from(ALPHABET[usize::from(*b) % ALPHABET.len()])).collect()
}
