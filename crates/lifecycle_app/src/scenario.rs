//! Scripted world scenario.
//!
//! Builds a small world, starts one observer of each kind and drives joins,
//! respawns, attribute changes, reparenting and leaves through it while every
//! activation takes a simulated amount of time. The resulting [`Report`]
//! counts activations and teardowns per observer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use lifecycle_core::{ActivationFuture, Dispatcher, Teardown};
use lifecycle_world::{EntityId, EntitySnapshot, Property, ROOT, World};
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::ScenarioConfig;

/// Activations and teardowns seen by one observer.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counts {
    pub started: u32,
    pub stopped: u32,
}

impl Counts {
    /// Activations still waiting for their teardown.
    pub fn live(&self) -> u32 {
        self.started.saturating_sub(self.stopped)
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub observers: BTreeMap<&'static str, Counts>,
    pub errors: Vec<String>,
    pub world: Option<EntitySnapshot>,
}

impl Report {
    /// Total activations left without a teardown.
    pub fn leaked(&self) -> u32 {
        self.observers.values().map(Counts::live).sum()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (observer, counts) in &self.observers {
            writeln!(
                f,
                "{observer:<12} started {:>3}  stopped {:>3}",
                counts.started, counts.stopped
            )?;
        }
        for err in &self.errors {
            writeln!(f, "error: {err}")?;
        }
        write!(f, "leaked: {}", self.leaked())
    }
}

#[derive(Clone, Default)]
struct Ledger {
    counts: Rc<RefCell<BTreeMap<&'static str, Counts>>>,
}

impl Ledger {
    fn record(&self, observer: &'static str, update: impl FnOnce(&mut Counts)) {
        update(self.counts.borrow_mut().entry(observer).or_default());
    }

    /// Activation callback that waits `latency`, then counts the activation
    /// and hands back a teardown that counts its own completion.
    fn activator<T: Debug + 'static>(
        &self,
        observer: &'static str,
        latency: Duration,
    ) -> impl Fn(T) -> ActivationFuture + 'static {
        let ledger = self.clone();
        move |value: T| {
            let ledger = ledger.clone();
            async move {
                sleep(latency).await;
                ledger.record(observer, |c| c.started += 1);
                info!(observer, ?value, "activated");
                Ok(Teardown::from_future(async move {
                    ledger.record(observer, |c| c.stopped += 1);
                    debug!(observer, ?value, "deactivated");
                }))
            }
            .boxed_local()
        }
    }

    fn snapshot(&self) -> BTreeMap<&'static str, Counts> {
        self.counts.borrow().clone()
    }
}

/// Run the scenario on the current `LocalSet`.
pub async fn run(config: &ScenarioConfig) -> anyhow::Result<Report> {
    let settle = config.settle_time();
    let ledger = Ledger::default();
    let errors: Rc<RefCell<Vec<String>>> = Rc::default();
    let dispatcher = {
        let errors = Rc::clone(&errors);
        Dispatcher::tokio().with_error_sink(move |err| errors.borrow_mut().push(err.to_string()))
    };

    let world = World::new();
    let workspace = world.spawn(ROOT, "Workspace")?;
    let lobby = world.spawn(ROOT, "Lobby")?;
    let mut lamps = Vec::new();
    for (scope, count) in [(workspace, 3), (lobby, 2)] {
        for i in 0..count {
            let lamp = world.spawn(scope, format!("Lamp{i}"))?;
            world.add_tag(lamp, "Lamp")?;
            lamps.push(lamp);
        }
    }
    let main_lamp = lamps[0];
    let faulty_lamp = lamps[2];
    let lobby_lamp = lamps[3];
    world.set_attribute(faulty_lamp, "Faulty", true)?;
    info!(entities = world.entity_count(), "world built");

    let lamp_activate = {
        let world = world.clone();
        let activate = ledger.activator("lamps", config.latency);
        move |lamp: EntityId| {
            let faulty = world.attribute(lamp, "Faulty") == Some(Value::Bool(true));
            let activation = activate(lamp);
            async move {
                if faulty {
                    anyhow::bail!("lamp {lamp} has a faulty bulb");
                }
                activation.await
            }
        }
    };
    let mut lamp_observer = world
        .observe_tag("Lamp")
        .within(world.within([workspace]))
        .start(&dispatcher, lamp_activate);
    let mut power_observer = world
        .observe_attribute(main_lamp, "Power")
        .with_guard(|power| power.as_f64().is_some_and(|p| p > 0.0))
        .start(&dispatcher, ledger.activator("power", config.latency));
    let mut parent_observer = world
        .observe_property(main_lamp, Property::Parent)
        .start(&dispatcher, ledger.activator("lamp-parent", config.latency));
    let mut player_observer = world
        .observe_players()
        .start(&dispatcher, ledger.activator("players", config.latency));
    let mut character_observer = {
        let activate = ledger.activator("characters", config.latency);
        world
            .observe_characters()
            .start(&dispatcher, move |player, character| activate((player, character)))
    };
    sleep(settle).await;

    info!("cycling power");
    for power in [0, 5, -1, 8] {
        world.set_attribute(main_lamp, "Power", power)?;
    }
    sleep(settle).await;

    info!("moving lamps between scopes");
    world.set_parent(lobby_lamp, Some(workspace))?;
    world.set_parent(main_lamp, Some(lobby))?;
    sleep(settle).await;
    world.set_parent(main_lamp, Some(workspace))?;
    sleep(settle).await;

    info!(players = config.players, "players joining");
    let mut players = Vec::with_capacity(config.players);
    for i in 0..config.players {
        let player = world.add_player(format!("player{i}"))?;
        world.spawn_character(player, workspace)?;
        players.push(player);
    }
    sleep(settle).await;

    for round in 0..config.respawns {
        info!(round, "respawning characters");
        for player in &players {
            world.spawn_character(*player, workspace)?;
            sleep(config.latency / 2).await;
        }
    }
    sleep(settle).await;

    info!("half of the players leave");
    for player in players.iter().step_by(2) {
        world.remove_player(*player)?;
    }
    world.despawn(lamps[1])?;
    sleep(settle).await;

    info!(
        lamps = lamp_observer.tracked(),
        players = player_observer.active_keys().len(),
        "stopping observers"
    );
    lamp_observer.stop();
    power_observer.stop();
    parent_observer.stop();
    player_observer.stop();
    character_observer.stop();
    sleep(settle).await;

    let errors = errors.borrow().clone();
    Ok(Report {
        observers: ledger.snapshot(),
        errors,
        world: world.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use tokio::task::LocalSet;

    use super::*;

    #[tokio::test]
    async fn test_scenario_tears_down_everything() {
        let config = ScenarioConfig::new(2)
            .with_respawns(2)
            .with_latency(Duration::from_millis(2));
        let report = LocalSet::new().run_until(run(&config)).await.unwrap();

        assert_eq!(report.leaked(), 0, "{report}");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("faulty bulb"));
        assert_eq!(report.observers["players"].started, 2);
        assert_eq!(report.observers["characters"].started, 2 * 3);
        assert_eq!(report.observers["power"].started, 2);
    }

    #[test]
    fn test_report_display() {
        let mut observers = BTreeMap::new();
        observers.insert(
            "lamps",
            Counts {
                started: 3,
                stopped: 2,
            },
        );
        let report = Report {
            observers,
            errors: vec!["boom".to_string()],
            world: None,
        };
        let text = report.to_string();
        assert!(text.contains("lamps"));
        assert!(text.contains("error: boom"));
        assert!(text.ends_with("leaked: 1"));
    }
}
