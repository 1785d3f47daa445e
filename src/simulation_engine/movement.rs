// movement.rs
//
// Timer tasks. None of them touch the grid: each sleeps for a sampled delay and then
// asks the dispatch loop to act by sending a `Request`.
use crate::communication::messages::Request;
use crate::global_variables::MAX_DELAY_UNITS;
use crate::simulation_engine::episodes::{Accident, ParkingEpisode, SlowDown};
use crate::simulation_engine::sampling::{exponential_delay, uniform_unit};
use crate::simulation_engine::vehicles::{CarId, Direction};
use log::trace;
use rand::rngs::SmallRng;
use tokio::sync::mpsc::Sender;
use tokio::time::{sleep, Duration};

/// Which end of the grid a flow clock feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    In,
    Out,
}

/// Converts sampled time units to wall time, capping runaway delays.
pub fn units_to_duration(units: f64, clock_unit: Duration) -> Duration {
    let units = if units.is_finite() {
        units.clamp(0.0, MAX_DELAY_UNITS)
    } else {
        MAX_DELAY_UNITS
    };
    clock_unit.mul_f64(units)
}

async fn exponential_sleep(rate: f64, clock_unit: Duration, rng: &mut SmallRng) {
    let units = exponential_delay(rate, rng);
    sleep(units_to_duration(units, clock_unit)).await;
}

/// A car's movement clock. Waits at the car's speed and, once the movement draw passes,
/// asks the loop to step the car. A failed draw starts a fresh wait.
pub async fn car_clock(
    car: CarId,
    epoch: u64,
    speed: f64,
    prob_movement: f64,
    clock_unit: Duration,
    mut rng: SmallRng,
    tx: Sender<Request>,
) {
    loop {
        exponential_sleep(speed, clock_unit, &mut rng).await;
        if uniform_unit(&mut rng) < prob_movement {
            break;
        }
        trace!("{car} hesitated, waiting again");
    }
    let _ = tx.send(Request::CarStep { car, epoch }).await;
}

/// Endless arrival or departure clock for one direction. Stops when the loop goes away
/// or when the loop aborts it.
pub async fn flow_clock(
    direction: Direction,
    flow: Flow,
    rate: f64,
    clock_unit: Duration,
    mut rng: SmallRng,
    tx: Sender<Request>,
) {
    loop {
        exponential_sleep(rate, clock_unit, &mut rng).await;
        let request = match flow {
            Flow::In => Request::EnterGrid(direction),
            Flow::Out => Request::ExitGrid(direction),
        };
        if tx.send(request).await.is_err() {
            return;
        }
    }
}

/// Waits out an accident, then settles whether its cars restart or get towed.
pub async fn accident_clock(
    mut accident: Accident,
    clock_unit: Duration,
    mut rng: SmallRng,
    tx: Sender<Request>,
) {
    exponential_sleep(accident.removal_rate, clock_unit, &mut rng).await;
    accident.resolve(uniform_unit(&mut rng));
    let _ = tx.send(Request::AccidentTimeout(accident)).await;
}

pub async fn parking_clock(
    episode: ParkingEpisode,
    clock_unit: Duration,
    mut rng: SmallRng,
    tx: Sender<Request>,
) {
    exponential_sleep(episode.parking_time_rate, clock_unit, &mut rng).await;
    let _ = tx.send(Request::ParkingTimeout(episode)).await;
}

pub async fn slowdown_clock(
    slow: SlowDown,
    clock_unit: Duration,
    mut rng: SmallRng,
    tx: Sender<Request>,
) {
    exponential_sleep(slow.slow_down_rate, clock_unit, &mut rng).await;
    let _ = tx.send(Request::SlowdownTimeout(slow)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::episodes::AccidentResolution;
    use crate::simulation_engine::grid::LocationState;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    const UNIT: Duration = Duration::from_millis(10);

    #[test]
    fn durations_are_scaled_and_capped() {
        assert_eq!(units_to_duration(2.0, UNIT), Duration::from_millis(20));
        assert_eq!(units_to_duration(-1.0, UNIT), Duration::ZERO);
        let cap = UNIT.mul_f64(MAX_DELAY_UNITS);
        assert_eq!(units_to_duration(f64::INFINITY, UNIT), cap);
        assert_eq!(units_to_duration(MAX_DELAY_UNITS * 4.0, UNIT), cap);
    }

    #[tokio::test(start_paused = true)]
    async fn car_clock_requests_a_step_with_its_epoch() {
        let (tx, mut rx) = mpsc::channel(4);
        let car = CarId {
            direction: Direction::Horizontal,
            number: 2,
        };
        tokio::spawn(car_clock(car, 7, 1.0, 1.0, UNIT, SmallRng::seed_from_u64(1), tx));
        assert_eq!(rx.recv().await, Some(Request::CarStep { car, epoch: 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn flow_clock_keeps_ticking() {
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(flow_clock(
            Direction::Vertical,
            Flow::Out,
            1.0,
            UNIT,
            SmallRng::seed_from_u64(2),
            tx,
        ));
        for _ in 0..5 {
            assert_eq!(rx.recv().await, Some(Request::ExitGrid(Direction::Vertical)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flow_clock_stops_when_loop_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let task = tokio::spawn(flow_clock(
            Direction::Horizontal,
            Flow::In,
            1.0,
            UNIT,
            SmallRng::seed_from_u64(3),
            tx,
        ));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accident_clock_resolves_before_reporting() {
        let (tx, mut rx) = mpsc::channel(1);
        let accident = Accident::new((1, 1), LocationState::Lane, 1.0, 1.0);
        tokio::spawn(accident_clock(accident, UNIT, SmallRng::seed_from_u64(4), tx));
        match rx.recv().await {
            Some(Request::AccidentTimeout(accident)) => {
                assert_eq!(accident.resolution, AccidentResolution::Resolved)
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
}
