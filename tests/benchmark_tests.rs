//! Performance benchmarks for the synchronization hot paths

use client::prediction::PredictedState;
use client::reconciliation::ReconciliationManager;
use server::config::{GameConfig, NetworkConfig, RateLimitConfig};
use server::game::GameInstance;
use server::optimizer::{NetworkOptimizer, QueuedMessage};
use server::rate_limiter::RateLimiter;
use shared::{
    apply_delta, compute_delta, AuthoritativeState, BoardBounds, CorrectionEntry, CorrectionType,
    CorrectionValue, Direction, Entity, EntityKind, FullState, GamePhase, Message, Ping, Player, PlayerInput,
    Position, Velocity,
};
use std::time::Instant;

/// Active round with `players` cursors and `mice` moving entities.
fn busy_state(players: usize, mice: usize) -> AuthoritativeState {
    let now = 1_000;
    let mut state = AuthoritativeState::new(BoardBounds::default(), now);
    for i in 0..players {
        let id = format!("p{}", i);
        let position = Position::new(10.0 + i as f32 * 20.0, 100.0);
        state
            .add_player(Player::new(&id, &id, "red", position), now)
            .unwrap();
    }
    for i in 0..mice {
        let mouse = Entity::new(
            &format!("mouse-{}", i),
            EntityKind::Mouse,
            Position::new(5.0 + i as f32 * 7.0, 300.0),
        )
        .with_velocity(Velocity::new(60.0, 0.0))
        .with_direction(Direction::Right);
        state.add_entity(mouse, now).unwrap();
    }
    assert!(state.apply_phase_transition(GamePhase::Active, now));
    state
}

/// Benchmarks delta computation between consecutive ticks
#[test]
fn benchmark_delta_computation() {
    let prev = busy_state(32, 100);
    let mut curr = prev.clone();
    curr.tick(0.016, 1_016);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let delta = compute_delta(&prev, &curr);
        assert!(!delta.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Delta computation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks applying a delta on the receiving side
#[test]
fn benchmark_delta_application() {
    let prev = busy_state(32, 100);
    let mut curr = prev.clone();
    curr.tick(0.016, 1_016);
    let delta = compute_delta(&prev, &curr);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let applied = apply_delta(&prev, &delta).unwrap();
        assert_eq!(applied.sequence(), curr.sequence());
    }

    let duration = start.elapsed();
    println!(
        "Delta application: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks JSON encoding and decoding of a full game state
#[test]
fn benchmark_full_state_serialization() {
    let message = Message::GameState(FullState {
        state: busy_state(32, 100),
    });

    let iterations = 500;
    let start = Instant::now();

    for _ in 0..iterations {
        let text = message.encode().unwrap();
        let decoded = Message::decode(&text).unwrap();
        assert!(matches!(decoded, Message::GameState(_)));
    }

    let duration = start.elapsed();
    println!(
        "Full state serialization: {} roundtrips in {:?} ({:.2} μs/roundtrip)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks client-side prediction of buffered inputs
#[test]
fn benchmark_client_prediction() {
    let mut predicted = PredictedState::new("p0");
    predicted.update_from_server(busy_state(8, 20), 1_000);

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let now = 1_000 + i as u64;
        let position = Position::new((i % 800) as f32, (i % 600) as f32);
        let input = PlayerInput::movement(now, i, position);
        predicted.add_input(input, now).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Client prediction: {} predictions in {:?} ({:.2} μs/prediction)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(predicted.metrics().created, iterations as u64);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks reconciliation bookkeeping under load
#[test]
fn benchmark_reconciliation_performance() {
    let mut manager = ReconciliationManager::new();
    let inputs: Vec<PlayerInput> = (0..10)
        .map(|i| PlayerInput::movement(1_000 + i as u64 * 16, i, Position::new(i as f32, 0.0)))
        .collect();

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let now = 1_000 + i as u64 * 100;
        let correction = CorrectionEntry {
            entity_id: "p0".to_string(),
            correction_type: CorrectionType::Position,
            old_value: Some(CorrectionValue::Position(Position::new(0.0, 0.0))),
            new_value: CorrectionValue::Position(Position::new(150.0, 0.0)),
            smoothing_duration: 50.0,
        };
        manager.reconcile(i, vec![correction], inputs.clone(), now);
        manager.update(now);
    }

    let duration = start.elapsed();
    println!(
        "Reconciliation: {} reconciliations in {:?} ({:.2} μs/reconciliation)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(manager.stats().total, iterations);
    assert!(duration.as_millis() < 1000);
}

/// Stress tests the per-player rate limiter with many players
#[test]
fn stress_test_rate_limiter() {
    let mut limiter = RateLimiter::new(RateLimitConfig::default());
    let players: Vec<String> = (0..32).map(|i| format!("p{}", i)).collect();

    let start = Instant::now();
    let mut admitted = 0;

    for step in 0..1_000u64 {
        let now = 1_000 + step * 10;
        for player in &players {
            if limiter.check(player, now).is_ok() {
                admitted += 1;
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Rate limiter: 32 players × 1000 checks in {:?}, {} admitted",
        duration, admitted
    );

    assert!(admitted > 0);
    assert_eq!(limiter.tracked_players(), 32);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks outbound message prioritization
#[test]
fn benchmark_message_prioritization() {
    let mut optimizer = NetworkOptimizer::new(NetworkConfig::default(), 30.0);
    optimizer.register(1);
    optimizer.record_rtt(1, 80.0, 1_000);

    let queued: Vec<QueuedMessage> = (0..200)
        .map(|i| QueuedMessage {
            message: Message::Ping(Ping { timestamp: i }),
            enqueued_at: 1_000 + i,
        })
        .collect();

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let prioritized = optimizer.prioritize_messages(&queued, 1, 1_300);
        assert_eq!(prioritized.len(), queued.len());
    }

    let duration = start.elapsed();
    println!(
        "Message prioritization: {} batches of {} in {:?}",
        iterations,
        queued.len(),
        duration
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks authoritative simulation ticks with a full round running
#[test]
fn benchmark_game_ticks() {
    let config = GameConfig {
        mice_per_round: 50,
        ..GameConfig::default()
    };
    let mut now = 1_000;
    let mut game = GameInstance::with_seed(config, now, 5);
    for i in 0..8 {
        let id = format!("p{}", i);
        game.add_player(&id, &id, "red", now).unwrap();
    }

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        now += 16;
        game.tick(0.016, now);
        game.pending_updates();
    }

    let duration = start.elapsed();
    println!(
        "Game ticks: {} ticks in {:?} ({:.2} μs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}
