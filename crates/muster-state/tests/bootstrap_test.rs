// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for opening state from configuration.

use std::time::Duration;

use muster_state::config::Config;
use muster_state::life::Life;
use muster_state::state::State;

fn config(database_url: String) -> Config {
    Config {
        database_url,
        presence_period: Duration::from_millis(20),
        presence_poll_interval: Duration::from_millis(40),
    }
}

#[tokio::test]
async fn test_open_wires_config_through() {
    let config = config("sqlite::memory:".to_string());
    let state = State::open(&config, "model-x").await.unwrap();
    assert_eq!(state.model_uuid(), "model-x");
    assert_eq!(state.model().await.unwrap().life(), Life::Alive);

    let machine = state.add_machine("0", vec![]).await.unwrap();
    let watcher = state.presence_watcher(&config);
    let pinger = machine.set_agent_alive(config.presence_period);

    machine
        .wait_agent_alive(&watcher, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(machine.agent_alive(&watcher).await);

    pinger.stop().await;
    watcher.stop().await;
}

#[tokio::test]
async fn test_open_is_create_or_attach() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("muster.db");
    let config = config(format!("sqlite:{}?mode=rwc", path.display()));

    {
        let state = State::open(&config, "model-x").await.unwrap();
        state.add_machine("0", vec![]).await.unwrap();
    }

    // Second open attaches to the existing model instead of failing on
    // the already-present model document.
    let state = State::open(&config, "model-x").await.unwrap();
    assert_eq!(state.machine("0").await.unwrap().life(), Life::Alive);
}
