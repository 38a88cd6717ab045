//! Secret rewriting on the forward path.
//!
//! Detection itself lives in [`crate::policy::PolicyStore::find_secret_config`];
//! this module builds the header set that actually goes upstream: the `Host`
//! header dropped (the upstream URL carries the authority) and, for mediated
//! requests, every occurrence of the fake secret replaced by the real value.

use http::HeaderMap;
use http::HeaderValue;
use http::header::HOST;

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// The substituted value is not a legal HTTP header value.
    #[error("substituted header value is not header-safe")]
    UnsafeValue,
}

/// Copies the headers minus `Host`, preserving duplicates and order.
pub fn without_host(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name != &HOST {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Copies the headers minus `Host`, replacing every occurrence of `fake`
/// with `real` in each value. Values that are not valid UTF-8 cannot contain
/// the fake secret and pass through untouched.
pub fn substitute(
    headers: &HeaderMap,
    fake: &str,
    real: &str,
) -> Result<HeaderMap, RewriteError> {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == &HOST {
            continue;
        }
        let replaced = match value.to_str() {
            Ok(text) if text.contains(fake) => {
                HeaderValue::from_str(&text.replace(fake, real))
                    .map_err(|_| RewriteError::UnsafeValue)?
            }
            _ => value.clone(),
        };
        out.append(name.clone(), replaced);
    }
    Ok(out)
}
