use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;

use runwar::{
    config::GameConfig,
    notify::LogNotifier,
    scenario::{run_scenario, RunSummary, Scenario, ScenarioLoader},
    service::TerritoryService,
    snapshot::{SnapshotWriter, TerritorySnapshot},
    store::{InMemoryTileStore, TileStore},
    territory::{ActionType, ActorId, Owner, TeamId, Tile},
    validation::RejectReason,
};

fn scenario_loader() -> ScenarioLoader {
    ScenarioLoader::new(env!("CARGO_MANIFEST_DIR"))
}

fn scenario_path() -> PathBuf {
    PathBuf::from("scenarios/curitiba.yaml")
}

async fn play(scenario: &Scenario) -> (Arc<TerritoryService<InMemoryTileStore>>, Vec<RunSummary>) {
    let store = Arc::new(InMemoryTileStore::new());
    let service = Arc::new(
        TerritoryService::new(&GameConfig::default(), store, Arc::new(LogNotifier)).unwrap(),
    );
    let runs = run_scenario(scenario, Arc::clone(&service)).await.unwrap();
    (service, runs)
}

#[test]
fn scenario_loader_reads_fixture() {
    let scenario = scenario_loader().load(scenario_path()).expect("scenario parses");
    assert_eq!(scenario.name, "curitiba");
    assert_eq!(scenario.actors.len(), 4);
    assert_eq!(scenario.runs.len(), 11);
}

#[test]
fn missing_scenario_reports_the_path() {
    let err = scenario_loader().load("scenarios/nowhere.yaml").unwrap_err();
    assert!(format!("{err:#}").contains("nowhere.yaml"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn curitiba_plays_out_as_scripted() {
    let scenario = scenario_loader().load(scenario_path()).unwrap();
    let (service, runs) = play(&scenario).await;

    let actions: Vec<Option<ActionType>> = runs.iter().map(|run| run.action).collect();
    use ActionType::*;
    assert_eq!(
        actions,
        vec![
            Some(Conquest),
            Some(Conquest),
            Some(Conquest),
            Some(Attack),
            Some(Attack),
            Some(Attack),
            Some(Defense),
            Some(Attack),
            Some(Attack),
            None,
            None,
        ]
    );

    // dave breaks red's hold on the square on his third attack
    assert!(runs[7].owner_changed);
    assert_eq!(runs[7].owner_after, Some(Owner::Team(TeamId::from("blue"))));
    assert_eq!(runs[7].shield_after, Some(65));
    // alice cannot take it straight back during the cooldown
    assert_eq!(runs[8].shield_after, Some(30));
    assert!(!runs[8].owner_changed);

    assert_eq!(runs[9].error.as_deref(), Some("daily action quota exceeded: DAILY_LIMIT_ACTOR"));
    assert!(runs[10].rejected.contains(&RejectReason::DistanceTooShort));

    let tiles = service.store().tiles().await.unwrap();
    assert_eq!(tiles.len(), 3);
    let bob_tile = tiles
        .iter()
        .find(|tile| tile.owner == Owner::Solo(ActorId::from("bob")))
        .unwrap();
    assert_eq!(bob_tile.shield, 65);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaying_a_scenario_gives_the_same_territory() {
    let scenario = scenario_loader().load(scenario_path()).unwrap();
    let (first, first_runs) = play(&scenario).await;
    let (second, second_runs) = play(&scenario).await;
    let a: Vec<Tile> = first.store().tiles().await.unwrap();
    let b: Vec<Tile> = second.store().tiles().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(first_runs, second_runs);
}

#[tokio::test]
async fn snapshot_captures_final_state() {
    let scenario = scenario_loader().load(scenario_path()).unwrap();
    let (service, runs) = play(&scenario).await;
    let taken_at = scenario.start + Duration::hours(4);
    let snapshot = TerritorySnapshot::capture(&scenario.name, &*service, runs, taken_at)
        .await
        .unwrap();
    assert_eq!(snapshot.grid_level, 8);
    assert_eq!(snapshot.actions.len(), 9);
    assert_eq!(snapshot.runs.len(), 11);

    let dir = tempfile::tempdir().unwrap();
    let path = SnapshotWriter::new(dir.path()).write(&snapshot).unwrap();
    assert_eq!(SnapshotWriter::load(&path).unwrap(), snapshot);
}
