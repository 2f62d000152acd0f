//! Data permission resolution.
//!
//! A request is allowed when the identity owns the dataset, submitted
//! the target thing, or at least one permission scope it can see grants
//! the action. Scopes are the dataset itself (every identity), a live
//! API key, each matching CORS origin and each group the user belongs
//! to. Within one scope a row naming the submission set beats the `*`
//! row; a scope with neither has no opinion.
//!
//! Resolution is split in two: [`PermissionResolver::snapshot`] loads
//! the rows an identity can see, and [`decide`] folds them without
//! touching the store.

use std::sync::Arc;

use geoshare_core::error::{GeoshareError, GeoshareResult};
use geoshare_core::models::dataset::Dataset;
use geoshare_core::models::identity::Identity;
use geoshare_core::models::permission::{Action, DataPermission, PermissionScope};
use geoshare_core::models::thing::Thing;
use geoshare_core::repository::{
    ApiKeyRepository, DataPermissionRepository, DatasetRepository, EntityStore, GroupRepository,
    OriginRepository,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::credential::hash_api_key;
use crate::origin::OriginPattern;

/// The vote of one scope instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    /// No row covers the submission set.
    NoOpinion,
    Allow,
    Deny,
}

/// Evaluates the rows of a single scope instance.
pub fn evaluate_scope(
    rows: &[DataPermission],
    action: Action,
    submission_set: &str,
    protected: bool,
) -> ScopeDecision {
    let row = rows
        .iter()
        .find(|r| r.submission_set == submission_set)
        .or_else(|| rows.iter().find(|r| r.is_wildcard()));

    match row {
        None => ScopeDecision::NoOpinion,
        Some(r) if r.grants.allows(action) && (!protected || r.grants.can_access_protected) => {
            ScopeDecision::Allow
        }
        Some(_) => ScopeDecision::Deny,
    }
}

/// A permission question about one dataset.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub identity: Identity,
    pub action: Action,
    pub dataset_id: Uuid,
    pub submission_set: String,
    /// Recorded submitter of the target thing, when there is one.
    pub submitter_id: Option<Uuid>,
    /// The request reads invisible things, private places or private
    /// fields.
    pub protected: bool,
}

impl PermissionRequest {
    pub fn new(
        identity: Identity,
        action: Action,
        dataset_id: Uuid,
        submission_set: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            action,
            dataset_id,
            submission_set: submission_set.into(),
            submitter_id: None,
            protected: false,
        }
    }

    /// Targets an existing thing, enabling the submitter bypass.
    pub fn on_thing(mut self, thing: &Thing) -> Self {
        self.submitter_id = thing.submitter_id;
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// The error to return when this request is denied.
    pub fn denial(&self) -> GeoshareError {
        self.identity.denial(self.action, &self.submission_set)
    }
}

/// Permission rows of one scope instance.
#[derive(Debug, Clone)]
pub struct ScopeRows {
    pub scope: PermissionScope,
    pub rows: Vec<DataPermission>,
}

/// Everything [`decide`] needs to answer for one identity and dataset.
#[derive(Debug, Clone)]
pub struct PermissionSnapshot {
    pub dataset: Dataset,
    pub scopes: Vec<ScopeRows>,
}

/// Pure permission decision.
pub fn decide(snapshot: &PermissionSnapshot, request: &PermissionRequest) -> bool {
    let user_id = request.identity.user_id();

    if user_id.is_some_and(|u| snapshot.dataset.is_owned_by(u)) {
        return true;
    }

    if user_id.is_some() && user_id == request.submitter_id {
        return true;
    }

    if request.action == Action::Create && user_id.is_none() && snapshot.dataset.auth_required {
        return false;
    }

    snapshot
        .scopes
        .iter()
        .map(|s| {
            evaluate_scope(
                &s.rows,
                request.action,
                &request.submission_set,
                request.protected,
            )
        })
        .any(|d| d == ScopeDecision::Allow)
}

/// Loads permission snapshots from the entity store.
pub struct PermissionResolver<S: EntityStore> {
    store: Arc<S>,
}

impl<S: EntityStore> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: EntityStore> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Loads the dataset and every scope the identity can see in it.
    pub async fn snapshot(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
    ) -> GeoshareResult<PermissionSnapshot> {
        let dataset = self.store.datasets().get_by_id(dataset_id).await?;

        // The owner needs no rows.
        if identity.user_id().is_some_and(|u| dataset.is_owned_by(u)) {
            return Ok(PermissionSnapshot {
                dataset,
                scopes: Vec::new(),
            });
        }

        let mut scopes = vec![PermissionScope::Dataset(dataset_id)];
        match identity {
            Identity::Anonymous => {}
            Identity::User { user_id } => {
                let groups = self
                    .store
                    .groups()
                    .get_user_groups(dataset_id, *user_id)
                    .await?;
                scopes.extend(groups.into_iter().map(|g| PermissionScope::Group(g.id)));
            }
            Identity::ApiKey { key } => {
                if let Some(key_id) = self.live_key(dataset_id, key).await? {
                    scopes.push(PermissionScope::ApiKey(key_id));
                }
            }
            Identity::Origin { origin } => {
                scopes.extend(
                    self.matching_origins(dataset_id, origin)
                        .await?
                        .into_iter()
                        .map(PermissionScope::Origin),
                );
            }
        }

        let rows = self.store.permissions().list_for_dataset(dataset_id).await?;
        let scopes = scopes
            .into_iter()
            .map(|scope| ScopeRows {
                scope,
                rows: rows.iter().filter(|r| r.scope == scope).cloned().collect(),
            })
            .collect();

        Ok(PermissionSnapshot { dataset, scopes })
    }

    /// Answers a permission request.
    pub async fn check(&self, request: &PermissionRequest) -> GeoshareResult<bool> {
        let snapshot = self.snapshot(&request.identity, request.dataset_id).await?;
        let allowed = decide(&snapshot, request);
        debug!(
            dataset_id = %request.dataset_id,
            action = %request.action,
            submission_set = %request.submission_set,
            protected = request.protected,
            allowed,
            "Permission checked"
        );
        Ok(allowed)
    }

    async fn live_key(&self, dataset_id: Uuid, raw_key: &str) -> GeoshareResult<Option<Uuid>> {
        match self
            .store
            .api_keys()
            .get_by_hash(dataset_id, &hash_api_key(raw_key))
            .await
        {
            Ok(key) if key.active => Ok(Some(key.id)),
            Ok(_) | Err(GeoshareError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn matching_origins(&self, dataset_id: Uuid, origin: &str) -> GeoshareResult<Vec<Uuid>> {
        let origins = self.store.origins().list(dataset_id).await?;
        Ok(origins
            .into_iter()
            .filter(|o| match OriginPattern::new(&o.pattern) {
                Ok(pattern) => pattern.matches(origin),
                Err(e) => {
                    warn!(origin_id = %o.id, error = %e, "Skipping unusable origin pattern");
                    false
                }
            })
            .map(|o| o.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use geoshare_core::models::permission::Grants;

    use super::*;

    fn dataset(owner_id: Uuid, auth_required: bool) -> Dataset {
        Dataset {
            id: Uuid::new_v4(),
            owner_id,
            slug: "ds".into(),
            display_name: "DS".into(),
            auth_required,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn row(scope: PermissionScope, set: &str, grants: Grants) -> DataPermission {
        DataPermission {
            id: Uuid::new_v4(),
            dataset_id: scope.id(),
            scope,
            submission_set: set.into(),
            grants,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// A snapshot holding only the default dataset row.
    fn default_snapshot(ds: Dataset) -> PermissionSnapshot {
        let scope = PermissionScope::Dataset(ds.id);
        PermissionSnapshot {
            scopes: vec![ScopeRows {
                scope,
                rows: vec![row(scope, "*", Grants::read_only())],
            }],
            dataset: ds,
        }
    }

    fn request(identity: Identity, action: Action, ds: &Dataset, set: &str) -> PermissionRequest {
        PermissionRequest::new(identity, action, ds.id, set)
    }

    #[test]
    fn owner_may_do_anything() {
        let owner = Uuid::new_v4();
        let snapshot = PermissionSnapshot {
            dataset: dataset(owner, true),
            scopes: vec![],
        };
        for action in Action::ALL {
            let req = request(
                Identity::User { user_id: owner },
                action,
                &snapshot.dataset,
                "comments",
            )
            .protected(true);
            assert!(decide(&snapshot, &req));
        }
    }

    #[test]
    fn default_rows_are_read_open_write_closed() {
        let snapshot = default_snapshot(dataset(Uuid::new_v4(), false));
        let ds = &snapshot.dataset;
        assert!(decide(&snapshot, &request(Identity::Anonymous, Action::Retrieve, ds, "places")));
        for action in [Action::Create, Action::Update, Action::Destroy] {
            assert!(!decide(&snapshot, &request(Identity::Anonymous, action, ds, "places")));
        }
    }

    #[test]
    fn submitter_bypasses_rows() {
        let snapshot = default_snapshot(dataset(Uuid::new_v4(), false));
        let submitter = Uuid::new_v4();
        let mut req = request(
            Identity::User { user_id: submitter },
            Action::Destroy,
            &snapshot.dataset,
            "comments",
        );
        assert!(!decide(&snapshot, &req));
        req.submitter_id = Some(submitter);
        assert!(decide(&snapshot, &req));
    }

    #[test]
    fn auth_required_blocks_unauthenticated_create() {
        let mut snapshot = default_snapshot(dataset(Uuid::new_v4(), true));
        let ds_scope = PermissionScope::Dataset(snapshot.dataset.id);
        snapshot.scopes[0].rows = vec![row(ds_scope, "*", Grants::all())];
        let ds = snapshot.dataset.clone();

        assert!(!decide(&snapshot, &request(Identity::Anonymous, Action::Create, &ds, "places")));
        assert!(!decide(
            &snapshot,
            &request(Identity::ApiKey { key: "k".into() }, Action::Create, &ds, "places")
        ));
        assert!(decide(
            &snapshot,
            &request(
                Identity::User {
                    user_id: Uuid::new_v4()
                },
                Action::Create,
                &ds,
                "places"
            )
        ));
        // Only create is gated.
        assert!(decide(&snapshot, &request(Identity::Anonymous, Action::Update, &ds, "places")));
    }

    #[test]
    fn specific_row_beats_wildcard() {
        let scope = PermissionScope::ApiKey(Uuid::new_v4());
        let rows = vec![
            row(scope, "*", Grants::read_create()),
            row(scope, "comments", Grants::default()),
        ];
        assert_eq!(
            evaluate_scope(&rows, Action::Create, "comments", false),
            ScopeDecision::Deny
        );
        assert_eq!(
            evaluate_scope(&rows, Action::Create, "places", false),
            ScopeDecision::Allow
        );
        assert_eq!(
            evaluate_scope(&rows[1..], Action::Create, "places", false),
            ScopeDecision::NoOpinion
        );
    }

    #[test]
    fn a_deny_in_one_scope_is_not_a_veto() {
        let mut snapshot = default_snapshot(dataset(Uuid::new_v4(), false));
        let key_scope = PermissionScope::ApiKey(Uuid::new_v4());
        snapshot.scopes.push(ScopeRows {
            scope: key_scope,
            rows: vec![row(key_scope, "comments", Grants::read_create())],
        });
        let ds = snapshot.dataset.clone();
        let identity = Identity::ApiKey { key: "k".into() };

        assert!(decide(&snapshot, &request(identity.clone(), Action::Create, &ds, "comments")));
        // The dataset row denies create but the key allows it; retrieve on
        // places falls through to the dataset row.
        assert!(decide(&snapshot, &request(identity.clone(), Action::Retrieve, &ds, "places")));
        assert!(!decide(&snapshot, &request(identity, Action::Create, &ds, "places")));
    }

    #[test]
    fn protected_reads_need_the_protected_flag() {
        let scope = PermissionScope::Group(Uuid::new_v4());
        let plain = vec![row(scope, "*", Grants::read_only())];
        assert_eq!(
            evaluate_scope(&plain, Action::Retrieve, "places", true),
            ScopeDecision::Deny
        );

        let privileged = vec![row(
            scope,
            "*",
            Grants {
                can_retrieve: true,
                can_access_protected: true,
                ..Default::default()
            },
        )];
        assert_eq!(
            evaluate_scope(&privileged, Action::Retrieve, "places", true),
            ScopeDecision::Allow
        );
    }

    #[test]
    fn denial_maps_identity_to_status() {
        let ds = dataset(Uuid::new_v4(), false);
        let anon = request(Identity::Anonymous, Action::Update, &ds, "places");
        assert_eq!(anon.denial().status_code(), 401);
        let keyed = request(Identity::ApiKey { key: "k".into() }, Action::Update, &ds, "places");
        assert_eq!(keyed.denial().status_code(), 403);
    }
}
