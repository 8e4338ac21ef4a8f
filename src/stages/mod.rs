//! Staged pipeline: hub, then spoke, then DNS/validation.
//!
//! Each stage reads the snapshots of the stages before it from the
//! [`SnapshotStore`], converges its resources and writes its own snapshot.
//! The first failing stage stops the run.

pub mod dns;
pub mod hub;
pub mod spoke;

use crate::azure::RemoteApi;
use crate::config::LabConfig;
use crate::error::Result;
use crate::models::{CheckResult, DnsOutput, HubOutput, SpokeOutput, StageName};
use crate::output::SnapshotStore;
use crate::processing::{JournalEntry, Reconciler, Sleeper};

/// What one stage did.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageName,
    pub journal: Vec<JournalEntry>,
    pub checks: Vec<CheckResult>,
}

pub struct Pipeline<'a, A: RemoteApi> {
    config: &'a LabConfig,
    reconciler: Reconciler<A>,
    store: SnapshotStore,
}

impl<'a, A: RemoteApi> Pipeline<'a, A> {
    pub fn new(config: &'a LabConfig, api: A, sleeper: Box<dyn Sleeper>) -> Pipeline<'a, A> {
        Pipeline {
            config,
            reconciler: Reconciler::new(api, config.retry.clone(), sleeper),
            store: SnapshotStore::new(&config.state_dir),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<A> {
        &mut self.reconciler
    }

    pub fn into_api(self) -> A {
        self.reconciler.into_api()
    }

    pub fn run_stage(&mut self, stage: StageName) -> Result<StageReport> {
        self.reconciler.take_journal();
        let mut checks = vec![];
        match stage {
            StageName::Hub => {
                let out = hub::run(&mut self.reconciler, self.config)?;
                self.store.write(stage, &out)?;
            }
            StageName::Spoke => {
                let hub_out = self.store.read::<HubOutput>(StageName::Hub)?.data;
                let out = spoke::run(&mut self.reconciler, self.config, &hub_out)?;
                self.store.write(stage, &out)?;
            }
            StageName::Dns => {
                let hub_out = self.store.read::<HubOutput>(StageName::Hub)?.data;
                let spoke_out = self.store.read::<SpokeOutput>(StageName::Spoke)?.data;
                let out: DnsOutput = dns::run(&mut self.reconciler, self.config, &self.store, &hub_out, &spoke_out)?;
                checks = out.checks.clone();
                self.store.write(stage, &out)?;
            }
        }
        Ok(StageReport {
            stage,
            journal: self.reconciler.take_journal(),
            checks,
        })
    }

    /// Run `stages` in order; stop at the first error.
    pub fn run(&mut self, stages: &[StageName]) -> Result<Vec<StageReport>> {
        let mut reports = vec![];
        for stage in stages {
            log::info!("==== stage {stage} ====");
            match self.run_stage(*stage) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::error!("stage {stage} failed, halting: {e}");
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }
}

/// `hub`, `spoke`, `dns` or `all`.
pub fn parse_stages(arg: &str) -> Option<Vec<StageName>> {
    if arg.trim().eq_ignore_ascii_case("all") {
        Some(StageName::ALL.to_vec())
    } else {
        StageName::parse(arg).map(|stage| vec![stage])
    }
}
