//! Session correlation.
//!
//! Maps an inbound (external id, working directory, pane, predecessor)
//! tuple onto a canonical session row. Six strategies run in order and
//! stop at the first match; any resolution that is not an exact id match
//! adopts the inbound identifiers in the same transaction.

use chrono::{Duration, Utc};
use rusqlite::Transaction;

use hs_domain::hook::Correlation;
use hs_domain::{Error, Result};
use hs_store::queries::{projects, sessions};
use hs_store::records::SessionRecord;

/// Which strategy resolved the session, for event payloads and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ExternalId,
    ProjectPath,
    PathPrefix,
    PaneClaim,
    Predecessor,
    Created,
}

pub struct Correlator {
    /// Window within which a launcher-registered session is claimable by
    /// pane handle.
    pub claim_window_secs: u64,
}

impl Correlator {
    pub fn new(claim_window_secs: u64) -> Self {
        Self { claim_window_secs }
    }

    /// Resolve or create the canonical session for an inbound event.
    /// Fails with `unregistered_project` when nothing matches and the
    /// working directory belongs to no registered project.
    pub fn resolve(
        &self,
        tx: &Transaction,
        correlation: &Correlation,
    ) -> Result<(SessionRecord, Resolution)> {
        let now = Utc::now();
        let external_id = correlation.session_id.trim();

        // 1. Exact external id, still running. A restarted agent may
        // reuse its id after session_end; that lands in strategy 6 as a
        // fresh row chained to the ended one.
        if let Some(session) = sessions::get_active_by_external_id(tx, external_id)
            .map_err(hs_domain::Error::from)?
        {
            sessions::adopt_attrs(tx, session.id, None, &attrs_of(correlation, tx)?, now)
                .map_err(hs_domain::Error::from)?;
            let session = reload(tx, session.id)?;
            return Ok((session, Resolution::ExternalId));
        }

        let attrs = attrs_of(correlation, tx)?;

        // 2. Active session whose project path equals the working directory.
        // 3. Active session under the closest project path prefix.
        if let Some(cwd) = correlation.cwd.as_deref() {
            let exact = projects::get_by_path(tx, cwd.trim_end_matches('/'))
                .map_err(hs_domain::Error::from)?;
            let (project, resolution) = match exact {
                Some(p) => (Some(p), Resolution::ProjectPath),
                None => (
                    projects::find_owning(tx, cwd).map_err(hs_domain::Error::from)?,
                    Resolution::PathPrefix,
                ),
            };
            if let Some(project) = project {
                if let Some(session) = sessions::latest_active_by_project(tx, project.id)
                    .map_err(hs_domain::Error::from)?
                {
                    tracing::info!(
                        session_id = session.id,
                        old_external_id = %session.external_id,
                        new_external_id = %external_id,
                        strategy = ?resolution,
                        "re-correlated session by project path"
                    );
                    sessions::adopt_attrs(tx, session.id, Some(external_id), &attrs, now)
                        .map_err(hs_domain::Error::from)?;
                    return Ok((reload(tx, session.id)?, resolution));
                }
            }
        }

        // 4. Launcher-registered session claimable by pane handle.
        if let Some(pane) = correlation.tmux_pane_id.as_deref() {
            let since = now - Duration::seconds(self.claim_window_secs as i64);
            if let Some(session) = sessions::claimable_by_pane(tx, pane, since)
                .map_err(hs_domain::Error::from)?
            {
                sessions::adopt_attrs(tx, session.id, Some(external_id), &attrs, now)
                    .map_err(hs_domain::Error::from)?;
                return Ok((reload(tx, session.id)?, Resolution::PaneClaim));
            }
        }

        // 5. Continuity chain: the predecessor's project hosts the new
        // session.
        if let Some(previous) = correlation.previous_session_id.as_deref() {
            if let Some(predecessor) = sessions::get_by_external_id(tx, previous)
                .map_err(hs_domain::Error::from)?
            {
                let mut attrs = attrs.clone();
                attrs.predecessor_id = Some(predecessor.id);
                let session =
                    sessions::insert(tx, external_id, predecessor.project_id, now, &attrs)
                        .map_err(hs_domain::Error::from)?;
                return Ok((session, Resolution::Predecessor));
            }
        }

        // 6. Create, but only inside a registered project.
        let cwd = correlation
            .cwd
            .as_deref()
            .ok_or_else(|| Error::UnregisteredProject("<no working directory>".into()))?;
        let project = projects::find_owning(tx, cwd)
            .map_err(hs_domain::Error::from)?
            .ok_or_else(|| Error::UnregisteredProject(cwd.to_owned()))?;
        let mut attrs = attrs;
        if attrs.predecessor_id.is_none() {
            // An ended row with the same external id is this session's
            // previous incarnation.
            attrs.predecessor_id = sessions::get_by_external_id(tx, external_id)
                .map_err(hs_domain::Error::from)?
                .map(|prior| prior.id);
        }
        let session = sessions::insert(tx, external_id, project.id, now, &attrs)
            .map_err(hs_domain::Error::from)?;
        Ok((session, Resolution::Created))
    }
}

fn reload(tx: &Transaction, id: i64) -> Result<SessionRecord> {
    sessions::get_by_id(tx, id)
        .map_err(hs_domain::Error::from)?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))
}

fn attrs_of(correlation: &Correlation, tx: &Transaction) -> Result<sessions::SessionAttrs> {
    let predecessor_id = match correlation.previous_session_id.as_deref() {
        Some(previous) => sessions::get_by_external_id(tx, previous)
            .map_err(hs_domain::Error::from)?
            .map(|s| s.id),
        None => None,
    };
    Ok(sessions::SessionAttrs {
        pane_id: correlation.tmux_pane_id.clone(),
        tmux_session: correlation.tmux_session.clone(),
        persona_slug: correlation.persona_slug.clone(),
        predecessor_id,
        transcript_path: correlation.transcript_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use hs_store::Store;

    use super::*;

    fn correlation(id: &str) -> Correlation {
        Correlation {
            session_id: id.to_owned(),
            ..Default::default()
        }
    }

    fn setup() -> (Store, Correlator) {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|tx| {
                projects::insert(tx, "/work/alpha", "alpha", Utc::now())?;
                projects::insert(tx, "/work", "work", Utc::now())?;
                Ok(())
            })
            .unwrap();
        (store, Correlator::new(30))
    }

    fn resolve(
        store: &Store,
        correlator: &Correlator,
        c: &Correlation,
    ) -> Result<(SessionRecord, Resolution)> {
        store.with_tx_domain(|tx| correlator.resolve(tx, c))
    }

    #[test]
    fn creates_inside_registered_project() {
        let (store, correlator) = setup();
        let mut c = correlation("s-1");
        c.cwd = Some("/work/alpha/src".into());
        let (session, resolution) = resolve(&store, &correlator, &c).unwrap();
        assert_eq!(resolution, Resolution::Created);
        assert_eq!(session.external_id, "s-1");
    }

    #[test]
    fn unregistered_project_refused() {
        let (store, correlator) = setup();
        let mut c = correlation("s-1");
        c.cwd = Some("/elsewhere".into());
        let err = resolve(&store, &correlator, &c).unwrap_err();
        assert_eq!(err.code(), "unregistered_project");

        let err = resolve(&store, &correlator, &correlation("s-2")).unwrap_err();
        assert_eq!(err.code(), "unregistered_project");
    }

    #[test]
    fn exact_external_id_wins() {
        let (store, correlator) = setup();
        let mut c = correlation("s-1");
        c.cwd = Some("/work/alpha".into());
        let (created, _) = resolve(&store, &correlator, &c).unwrap();

        // Same id, different cwd: still the same session.
        let mut again = correlation("s-1");
        again.cwd = Some("/work".into());
        again.tmux_pane_id = Some("%7".into());
        let (found, resolution) = resolve(&store, &correlator, &again).unwrap();
        assert_eq!(resolution, Resolution::ExternalId);
        assert_eq!(found.id, created.id);
        assert_eq!(found.pane_id.as_deref(), Some("%7"));
    }

    #[test]
    fn new_external_id_reclaims_active_session_in_project() {
        let (store, correlator) = setup();
        let mut c = correlation("old-id");
        c.cwd = Some("/work/alpha".into());
        let (original, _) = resolve(&store, &correlator, &c).unwrap();

        let mut restarted = correlation("new-id");
        restarted.cwd = Some("/work/alpha".into());
        let (claimed, resolution) = resolve(&store, &correlator, &restarted).unwrap();
        assert_eq!(resolution, Resolution::ProjectPath);
        assert_eq!(claimed.id, original.id);
        assert_eq!(claimed.external_id, "new-id");
    }

    #[test]
    fn prefix_match_picks_closest_project() {
        let (store, correlator) = setup();
        let mut seed = correlation("outer");
        seed.cwd = Some("/work/beta".into());
        resolve(&store, &correlator, &seed).unwrap();

        let mut c = correlation("inner");
        c.cwd = Some("/work/beta/deep/dir".into());
        let (session, resolution) = resolve(&store, &correlator, &c).unwrap();
        assert_eq!(resolution, Resolution::PathPrefix);
        assert_eq!(session.external_id, "inner");
    }

    #[test]
    fn pane_claim_within_window() {
        let (store, correlator) = setup();
        // Launcher pre-registers a session with a pane but a placeholder id.
        store
            .with_tx(|tx| {
                let project = projects::get_by_path(tx, "/work/alpha")?.unwrap();
                sessions::insert(
                    tx,
                    "launcher-placeholder",
                    project.id,
                    Utc::now(),
                    &sessions::SessionAttrs {
                        pane_id: Some("%3".into()),
                        ..Default::default()
                    },
                )?;
                Ok(())
            })
            .unwrap();

        let mut c = correlation("hook-id");
        c.tmux_pane_id = Some("%3".into());
        let (session, resolution) = resolve(&store, &correlator, &c).unwrap();
        assert_eq!(resolution, Resolution::PaneClaim);
        assert_eq!(session.external_id, "hook-id");
    }

    #[test]
    fn predecessor_chain_creates_in_same_project() {
        let (store, correlator) = setup();
        let mut first = correlation("gen-1");
        first.cwd = Some("/work/alpha".into());
        let (predecessor, _) = resolve(&store, &correlator, &first).unwrap();

        // End the predecessor so path correlation cannot match it.
        store
            .with_tx(|tx| sessions::mark_ended(tx, predecessor.id, Utc::now()))
            .unwrap();

        let mut next = correlation("gen-2");
        next.previous_session_id = Some("gen-1".into());
        let (session, resolution) = resolve(&store, &correlator, &next).unwrap();
        assert_eq!(resolution, Resolution::Predecessor);
        assert_eq!(session.project_id, predecessor.project_id);
        assert_eq!(session.predecessor_id, Some(predecessor.id));
    }
}
