use kube::api::ListParams;
use lrp_client::Store;
use std::fmt::Display;

use crate::{Error, Result};

/// The single object labelled with an identity, across all namespaces
///
/// Absence is `Ok(None)`, more than one match is [`Error::MultipleObjects`].
pub(crate) async fn find_one<K>(store: &dyn Store<K>, selector: &str, identity: &dyn Display) -> Result<Option<K>>
where
    K: Send + Sync + 'static,
{
    let mut objects = store
        .list(None, &ListParams::default().labels(selector))
        .await
        .map_err(Error::store("look up object", identity))?;
    match objects.len() {
        0 | 1 => Ok(objects.pop()),
        count => Err(Error::MultipleObjects {
            identity: identity.to_string(),
            count,
        }),
    }
}

/// Like [`find_one`], with absence as [`Error::NotFound`]
pub(crate) async fn get_one<K>(store: &dyn Store<K>, selector: &str, identity: &dyn Display) -> Result<K>
where
    K: Send + Sync + 'static,
{
    find_one(store, selector, identity).await?.ok_or_else(|| Error::NotFound {
        identity: identity.to_string(),
    })
}

/// Treat a store error as success when it is the outcome the caller wanted anyway
pub(crate) fn ignore(result: lrp_client::Result<()>, absorb: fn(&lrp_client::Error) -> bool) -> lrp_client::Result<()> {
    match result {
        Err(err) if absorb(&err) => {
            tracing::debug!(error = %err, "already in the desired state");
            Ok(())
        }
        other => other,
    }
}
