//! Planet scenarios.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use planet::{Planet, PlanetConfig, Reconfigure};
use satellite::db::PointerDb;
use satellite::metainfo::{Piece, Pointer, SegmentIndex, SegmentPath};
use satellite::{Config, NodeId, SatelliteError};

use super::helpers::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_satellites_get_distinct_addresses_and_dirs() {
    let mut planet = new_planet(planet_config(10), Reconfigure::default(), 3).await;

    let satellites = planet.satellites();
    assert_eq!(satellites.len(), 3);

    let mut addrs = HashSet::new();
    let mut dirs = HashSet::new();
    let mut ids = HashSet::new();
    for (i, satellite) in satellites.iter().enumerate() {
        assert_eq!(satellite.label(), format!("satellite{i}"));
        assert!(addrs.insert(satellite.addr()));
        assert!(addrs.insert(satellite.private_addr()));
        assert!(dirs.insert(satellite.storage_dir().to_path_buf()));
        assert!(ids.insert(satellite.id()));

        assert_eq!(satellite.node_url().id, satellite.id());
        assert_eq!(satellite.url(), format!("{}@{}", satellite.id(), satellite.addr()));

        let rs = satellite.config().metainfo.rs;
        assert_eq!((rs.min, rs.repair, rs.success, rs.total), (2, 4, 6, 8));
    }

    planet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_satellite_without_storage_nodes() {
    let mut planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = &planet.satellites()[0];

    let rs = satellite.config().metainfo.rs;
    assert_eq!((rs.min, rs.repair, rs.success, rs.total), (1, 1, 1, 1));
    assert!(!satellite.id().is_zero());
    assert!(!satellite.addr().is_empty());
    assert!(satellite.addr().starts_with("127.0.0.1:"));

    planet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_seeded_planets_share_identities() {
    let config = PlanetConfig {
        identity_seed: Some(7),
        ..planet_config(0)
    };
    let mut first = new_planet(config.clone(), Reconfigure::default(), 2).await;
    let mut second = new_planet(config, Reconfigure::default(), 2).await;

    let first_ids: Vec<NodeId> = first.satellites().iter().map(|s| s.id()).collect();
    let second_ids: Vec<NodeId> = second.satellites().iter().map(|s| s.id()).collect();
    assert_eq!(first_ids, second_ids);
    assert_ne!(first_ids[0], first_ids[1]);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_user_sets_full_name_password() {
    let mut planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    let user = add_user(&satellite, "Alice").await;
    let stored = satellite
        .databases
        .db
        .console()
        .get_user(&user.id)
        .unwrap()
        .unwrap();
    assert!(bcrypt::verify("Alice Example", &stored.password_hash).unwrap());

    let auth = satellite.authenticated_context(user.id).await.unwrap();
    assert_eq!(auth.user.email, "alice@example.com");

    let account = satellite.console.service.payments().account(&auth).unwrap();
    assert!(account.is_some());
    assert_eq!(satellite.mail.sent().await.len(), 1);

    let project = satellite.add_project(user.id, "demo").await.unwrap();
    assert_eq!(project.owner_id, user.id);
    let projects = satellite.console.service.get_users_projects(&auth).unwrap();
    assert_eq!(projects.len(), 1);

    planet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_user_surfaces_duplicate_email() {
    let mut planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    add_user(&satellite, "Bob").await;
    let err = satellite.add_user(new_user("Bob"), 3).await.unwrap_err();
    assert!(matches!(
        err,
        SatelliteError::Console(satellite::console::ConsoleError::EmailUsed(_))
    ));

    let err = satellite
        .authenticated_context(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, SatelliteError::NotFound(_)));

    planet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_factory_failure_releases_node_resources() {
    // Satellite 1 gets an invalid garbage collection config, so its last role
    // fails after every other resource was opened.
    let reconfigure = Reconfigure {
        satellite: Some(Arc::new(|_: &Logger, index: usize, config: &mut Config| {
            if index == 1 {
                config.garbage_collection.false_positive_rate = 2.0;
            }
        })),
        ..Default::default()
    };
    let mut planet = Planet::new(create_test_logger(), planet_config(0), reconfigure).unwrap();

    let err = planet.new_satellites(3).await.unwrap_err();
    assert!(matches!(err, SatelliteError::Config(_)));
    assert_eq!(planet.satellites().len(), 1);

    let failed_dir = planet.storage_root().join("satellite1");
    assert!(master_db_released(&failed_dir));
    assert!(!planet.storage_root().join("satellite2").exists());

    let survivor = planet.satellites()[0].clone();
    assert!(!master_db_released(survivor.storage_dir()));

    planet.shutdown().await.unwrap();
    assert!(master_db_released(survivor.storage_dir()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_pointer_db_hook_releases_master_db() {
    let reconfigure = Reconfigure {
        satellite_pointer_db: Some(Arc::new(
            |_: &Logger, _: usize, _: Arc<dyn PointerDb>| -> satellite::Result<Arc<dyn PointerDb>> {
                Err(SatelliteError::UnsupportedBackend("pointerdb://test".into()))
            },
        )),
        ..Default::default()
    };
    let mut planet = Planet::new(create_test_logger(), planet_config(0), reconfigure).unwrap();

    let err = planet.new_satellites(1).await.unwrap_err();
    assert!(matches!(err, SatelliteError::UnsupportedBackend(_)));
    assert!(planet.satellites().is_empty());
    assert!(master_db_released(&planet.storage_root().join("satellite0")));

    planet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_before_run_and_twice() {
    let planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    satellite.close().await.unwrap();
    assert!(satellite.live_accounting.is_closed());
    assert!(master_db_released(satellite.storage_dir()));

    satellite.close().await.unwrap();

    let err = satellite.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SatelliteError::Closed(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_wait_fails_fast_on_closed_satellite() {
    let planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    // Queued before close: released by close instead of waiting for a loop.
    let queued = {
        let satellite = satellite.clone();
        tokio::spawn(async move { satellite.repair.repairer.cycle().trigger_wait().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    satellite.close().await.unwrap();

    let result = tokio::time::timeout(SHUTDOWN_TIMEOUT, queued)
        .await
        .expect("queued trigger was not released by close")
        .unwrap();
    assert!(matches!(result, Err(SatelliteError::Closed(_))));

    let result = tokio::time::timeout(
        SHUTDOWN_TIMEOUT,
        satellite.repair.checker.cycle().trigger_wait(),
    )
    .await
    .expect("trigger_wait hung on a closed satellite");
    assert!(matches!(result, Err(SatelliteError::Closed(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_returns_promptly_on_cancel() {
    let planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    let cancel = CancellationToken::new();
    let run = {
        let satellite = satellite.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { satellite.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let result = tokio::time::timeout(SHUTDOWN_TIMEOUT, run)
        .await
        .expect("run did not return after cancel")
        .unwrap();
    assert!(result.is_ok());

    let err = satellite.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SatelliteError::AlreadyStarted(_)));

    satellite.close().await.unwrap();
    assert!(master_db_released(satellite.storage_dir()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_while_running_waits_for_run() {
    let mut planet = new_planet(planet_config(0), Reconfigure::default(), 2).await;
    planet.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let satellite = planet.satellites()[0].clone();
    tokio::time::timeout(SHUTDOWN_TIMEOUT, satellite.close())
        .await
        .expect("close did not return")
        .unwrap();
    assert!(master_db_released(satellite.storage_dir()));

    tokio::time::timeout(SHUTDOWN_TIMEOUT, planet.shutdown())
        .await
        .expect("shutdown did not return")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_role_error_is_returned_from_run() {
    let reconfigure = Reconfigure {
        satellite: Some(Arc::new(|_: &Logger, _: usize, config: &mut Config| {
            config.version.minimum = "999.0.0".to_string();
        })),
        ..Default::default()
    };
    let planet = new_planet(planet_config(0), reconfigure, 1).await;
    let satellite = planet.satellites()[0].clone();

    let result = tokio::time::timeout(SHUTDOWN_TIMEOUT, satellite.run(CancellationToken::new()))
        .await
        .expect("run did not return after role failure");
    assert!(matches!(result, Err(SatelliteError::Version(_))));

    satellite.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_revoked_identity_fails_run() {
    let planet = new_planet(planet_config(0), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    let revocations =
        satellite::revocation::RevocationDb::open(&satellite.config().server.revocation_db_url)
            .unwrap();
    revocations.revoke(&satellite.id()).unwrap();

    let result = tokio::time::timeout(SHUTDOWN_TIMEOUT, satellite.run(CancellationToken::new()))
        .await
        .expect("run did not return after revocation");
    assert!(matches!(result, Err(SatelliteError::Revoked(_))));

    satellite.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checker_queues_and_repairer_repairs() {
    // Five storage nodes: thresholds 1/2/3/4.
    let mut planet = new_planet(planet_config(5), Reconfigure::default(), 1).await;
    let satellite = planet.satellites()[0].clone();

    satellite.repair.checker.cycle().pause();
    satellite.repair.repairer.cycle().pause();
    planet.start();

    let online = check_in_storage_nodes(&satellite, 6);
    let rs = satellite.config().metainfo.rs;
    let pieces = vec![
        Piece { number: 0, node_id: online[0] },
        Piece { number: 1, node_id: online[1] },
        Piece { number: 2, node_id: NodeId([0xee; 32]) },
        Piece { number: 3, node_id: NodeId([0xef; 32]) },
    ];
    let path = SegmentPath::new(Uuid::new_v4(), SegmentIndex::Last, "bucket", "object");
    satellite
        .metainfo
        .service
        .put(&path, &Pointer::remote(rs, pieces, 4096, None))
        .unwrap();

    satellite.repair.checker.cycle().trigger_wait().await.unwrap();
    assert_eq!(satellite.repair.queue.count().unwrap(), 1);

    satellite.repair.repairer.cycle().trigger_wait().await.unwrap();
    assert_eq!(satellite.repair.queue.count().unwrap(), 0);
    assert_eq!(satellite.repair.repairer.repaired(), 1);

    let repaired = satellite.metainfo.service.get(&path).unwrap();
    let holders: Vec<NodeId> = repaired.pieces().iter().map(|p| p.node_id).collect();
    assert_eq!(holders.len(), rs.success);
    assert_eq!(
        satellite.overlay.service.known_reliable(&holders).unwrap().len(),
        rs.success
    );

    planet.shutdown().await.unwrap();
}
