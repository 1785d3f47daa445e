// simulation.rs
use crate::communication::messages::Request;
use crate::config::SimulationConfig;
use crate::error::SimulationResult;
use crate::global_variables::REQUEST_QUEUE_DEPTH;
use crate::shared_data::{GridView, Outcome, SimulationReport};
use crate::simulation_engine::episodes::{Accident, AccidentResolution, ParkingEpisode, SlowDown};
use crate::simulation_engine::grid::{grid_car_count, CellFilter, Grid, LocationState, Position};
use crate::simulation_engine::lane_selection::pick_location;
use crate::simulation_engine::movement::{
    accident_clock, car_clock, flow_clock, parking_clock, slowdown_clock, Flow,
};
use crate::simulation_engine::sampling::{poisson_density_trigger, uniform_unit, SpeedModel};
use crate::simulation_engine::vehicles::{CarId, CarState, Direction};

use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::Instant;

/// The dispatch loop and everything it owns.
///
/// Only this struct reads or writes the grid. Timer tasks hold nothing but a sender and
/// their own random source, so the loop processing one request at a time is the only
/// synchronisation the grid needs.
pub struct Simulation {
    config: SimulationConfig,
    grid: Grid,
    speeds: SpeedModel,
    rng: SmallRng,
    requests_tx: mpsc::Sender<Request>,
    requests_rx: mpsc::Receiver<Request>,
    actors: JoinSet<()>,
    inflow: [Option<AbortHandle>; 2],
    accidents: usize,
    views: watch::Sender<GridView>,
}

impl Simulation {
    /// Validates the configuration and builds the grid. No task is spawned until [`run`].
    ///
    /// [`run`]: Simulation::run
    pub fn new(config: SimulationConfig) -> SimulationResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let grid = Grid::new(&config, &mut rng)?;
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (views, _) = watch::channel(GridView::capture(&grid, 0, true));
        Ok(Self {
            speeds: SpeedModel::from_config(&config),
            config,
            grid,
            rng,
            requests_tx,
            requests_rx,
            actors: JoinSet::new(),
            inflow: [None, None],
            accidents: 0,
            views,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<GridView> {
        self.views.subscribe()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn accidents(&self) -> usize {
        self.accidents
    }

    /// Runs until both out-flow roots are full or `cancel` flips to `true`.
    /// Every timer task still alive when the loop stops is aborted.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> SimulationReport {
        let started = Instant::now();
        info!(
            "starting simulation: {}x{} grid, {} horizontal and {} vertical cars",
            self.grid.size(),
            self.grid.size(),
            grid_car_count(&self.config, Direction::Horizontal),
            grid_car_count(&self.config, Direction::Vertical)
        );
        self.spawn_flow_actors();
        self.publish();

        let mut listening = true;
        let outcome = loop {
            if self.is_completed() {
                break Outcome::Completed;
            }
            let cancelled = *cancel.borrow_and_update();
            if cancelled {
                break Outcome::Cancelled;
            }
            if let Some(outcome) = self.turn(&mut cancel, &mut listening).await {
                break outcome;
            }
        };

        self.actors.abort_all();
        let report =
            SimulationReport::from_grid(&self.grid, outcome, self.accidents, started.elapsed());
        self.views
            .send_replace(GridView::capture(&self.grid, self.accidents, false));
        match outcome {
            Outcome::Completed => info!("simulation completed after {:?}", report.elapsed),
            Outcome::Cancelled => info!("simulation cancelled after {:?}", report.elapsed),
        }
        info!(
            "accidents {}, arrived {}/{}, towed {}/{}, still parked {}",
            report.accidents,
            report.arrived_horizontal,
            report.arrived_vertical,
            report.deleted_horizontal,
            report.deleted_vertical,
            report.still_parked
        );
        report
    }

    /// Applies one request to the grid. Returns whether anything visible changed.
    /// Handles one event. Finished timer tasks are reaped ahead of queued requests.
    async fn turn(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
        listening: &mut bool,
    ) -> Option<Outcome> {
        tokio::select! {
            biased;
            changed = cancel.changed(), if *listening => {
                // A dropped handle can no longer cancel; keep running to completion.
                if changed.is_err() {
                    *listening = false;
                }
            }
            Some(joined) = self.actors.join_next(), if !self.actors.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        warn!("timer task panicked: {err}");
                    }
                }
            }
            Some(request) = self.requests_rx.recv() => {
                if self.dispatch(request) {
                    self.publish();
                }
            }
            else => return Some(Outcome::Cancelled),
        }
        None
    }

    pub(crate) fn dispatch(&mut self, request: Request) -> bool {
        let changed = match request {
            Request::EnterGrid(direction) => self.enter_grid(direction),
            Request::ExitGrid(direction) => self.exit_grid(direction),
            Request::CarStep { car, epoch } => self.step_car(car, epoch),
            Request::AccidentTimeout(accident) => self.clear_accident(accident),
            Request::ParkingTimeout(episode) => self.return_from_parking(episode),
            Request::SlowdownTimeout(slow) => self.end_slowdown(slow),
        };
        debug_assert!(self.grid.ownership_is_consistent());
        changed
    }

    pub(crate) fn is_completed(&self) -> bool {
        Direction::BOTH.iter().all(|&direction| {
            self.grid.out_root(direction).len() == grid_car_count(&self.config, direction)
        })
    }

    fn publish(&self) {
        self.views
            .send_replace(GridView::capture(&self.grid, self.accidents, true));
    }

    fn child_rng(&mut self) -> SmallRng {
        SmallRng::seed_from_u64(self.rng.random())
    }

    fn spawn_flow_actors(&mut self) {
        let clock_unit = self.config.clock_unit();
        for direction in Direction::BOTH {
            if self.grid.band(direction).is_none() {
                continue;
            }
            if !self.grid.in_root(direction).is_empty() {
                let rng = self.child_rng();
                let handle = self.actors.spawn(flow_clock(
                    direction,
                    Flow::In,
                    self.config.in_alpha,
                    clock_unit,
                    rng,
                    self.requests_tx.clone(),
                ));
                self.inflow[direction.index()] = Some(handle);
            }
            let rng = self.child_rng();
            self.actors.spawn(flow_clock(
                direction,
                Flow::Out,
                self.config.out_beta,
                clock_unit,
                rng,
                self.requests_tx.clone(),
            ));
        }
    }

    fn stop_inflow(&mut self, direction: Direction) {
        if let Some(handle) = self.inflow[direction.index()].take() {
            handle.abort();
            debug!("all {direction:?} cars have entered");
        }
    }

    /// Starts a fresh movement clock for a car, invalidating any older one.
    fn arm_car(&mut self, id: CarId) {
        let Some(car) = self.grid.car_mut(id) else {
            return;
        };
        let epoch = car.next_clock_epoch();
        let (speed, prob_movement) = (car.speed, car.prob_movement);
        let rng = self.child_rng();
        self.actors.spawn(car_clock(
            id,
            epoch,
            speed,
            prob_movement,
            self.config.clock_unit(),
            rng,
            self.requests_tx.clone(),
        ));
    }

    fn spawn_parking_clock(&mut self, episode: ParkingEpisode) {
        let rng = self.child_rng();
        self.actors.spawn(parking_clock(
            episode,
            self.config.clock_unit(),
            rng,
            self.requests_tx.clone(),
        ));
    }

    fn enter_grid(&mut self, direction: Direction) -> bool {
        let open = self.grid.candidate_cells(direction, 0, CellFilter::Open);
        let Some((x, y)) = pick_location(
            &self.grid,
            &open,
            direction,
            self.config.in_lane_choice,
            &mut self.rng,
        ) else {
            trace!("no open entry cell for {direction:?} traffic");
            return false;
        };
        let Some(car) = self.grid.pull_from_in_root(direction) else {
            self.stop_inflow(direction);
            return false;
        };
        let id = car.id;
        self.grid.place_car(car, Position::Cell(x, y));
        debug!("{id} entered at ({x}, {y})");
        self.arm_car(id);
        if self.grid.in_root(direction).is_empty() {
            self.stop_inflow(direction);
        }
        true
    }

    fn exit_grid(&mut self, direction: Direction) -> bool {
        let last = self.grid.size() - 1;
        let mut occupied = self.grid.candidate_cells(direction, last, CellFilter::Occupied);
        // Where bands cross at the edge, only cars travelling this way may leave here.
        occupied.retain(|&(x, y)| {
            self.grid
                .location(x, y)
                .cars
                .values()
                .any(|car| car.direction == direction)
        });
        let Some((x, y)) = pick_location(
            &self.grid,
            &occupied,
            direction,
            self.config.out_lane_choice,
            &mut self.rng,
        ) else {
            return false;
        };
        let leaving = self
            .grid
            .location(x, y)
            .cars
            .values()
            .find(|car| car.direction == direction)
            .map(|car| car.id);
        let Some(car) = leaving.and_then(|id| self.grid.take_car(id)) else {
            return false;
        };
        let id = car.id;
        self.grid.place_car(car, Position::OutRoot(direction));
        debug!("{id} left the grid at ({x}, {y})");
        true
    }

    fn step_car(&mut self, id: CarId, epoch: u64) -> bool {
        let Some(Position::Cell(x, y)) = self.grid.position_of(id) else {
            return false;
        };
        let Some(car) = self.grid.car(id) else {
            return false;
        };
        if car.clock_epoch != epoch {
            trace!("dropping stale clock of {id}");
            return false;
        }
        let direction = car.direction;

        // Stuck until the accident is cleared.
        if self.grid.location(x, y).state == LocationState::Accident {
            return false;
        }
        // At the far edge the car waits for the out-flow clock.
        let Some((nx, ny)) = self.next_cell(direction, x, y) else {
            return false;
        };
        let next_state = self.grid.location(nx, ny).state;
        if next_state == LocationState::Accident {
            trace!("{id} waits behind the accident at ({nx}, {ny})");
            self.arm_car(id);
            return false;
        }

        if self.config.parking_enabled
            && self.grid.location(x, y).permits_parking_exit()
            && poisson_density_trigger(self.config.distraction_rate, &mut self.rng)
        {
            if let Some(parking) = self.grid.parking_cell_for(direction, x, y) {
                self.park(id, (x, y), parking, direction);
                return true;
            }
        }

        let mut accident = false;
        if !self.grid.location(nx, ny).cars.is_empty() {
            accident = self.collision_occurs(nx, ny, next_state);
            if !accident {
                trace!("{id} blocked by traffic at ({nx}, {ny})");
                self.arm_car(id);
                return false;
            }
        }
        if !accident && next_state == LocationState::Crosswalk {
            accident = poisson_density_trigger(
                self.config.pedestrian_death_accident_prob,
                &mut self.rng,
            );
        }
        if accident {
            self.crash(id, (nx, ny), next_state);
            return true;
        }

        if uniform_unit(&mut self.rng) >= self.config.prob_entering_intersection {
            trace!("{id} hesitated before ({nx}, {ny})");
            self.arm_car(id);
            return false;
        }

        self.advance(id, (x, y), (nx, ny));
        true
    }

    /// Straight ahead, or with the switching probability any cell of the next cross-section.
    fn next_cell(&mut self, direction: Direction, x: usize, y: usize) -> Option<(usize, usize)> {
        let straight = self.grid.next_straight(direction, x, y)?;
        if uniform_unit(&mut self.rng) < self.config.prob_switching_lanes {
            let index = self.grid.downstream_index(direction, x, y)?;
            let cells = self.grid.candidate_cells(direction, index, CellFilter::Any);
            if let Some(cell) = pick_location(
                &self.grid,
                &cells,
                direction,
                self.config.lane_switch_choice,
                &mut self.rng,
            ) {
                return Some(cell);
            }
        }
        Some(straight)
    }

    /// Accident check against an occupied destination. With accident scaling the check is
    /// repeated once per occupied cell around the destination.
    fn collision_occurs(&mut self, x: usize, y: usize, state: LocationState) -> bool {
        let cutoff = if state == LocationState::Intersection {
            self.config.intersection_accident_cutoff()
        } else {
            self.config.accident_prob
        };
        if poisson_density_trigger(cutoff, &mut self.rng) {
            return true;
        }
        if self.config.accident_scaling {
            let nearby = self.grid.occupied_nearby(x, y);
            for _ in 0..nearby {
                if poisson_density_trigger(self.config.accident_prob, &mut self.rng) {
                    return true;
                }
            }
        }
        false
    }

    fn crash(&mut self, id: CarId, (x, y): (usize, usize), prev_state: LocationState) {
        self.accidents += 1;
        self.grid.set_state(x, y, LocationState::Accident);
        if let Some(car) = self.grid.take_car(id) {
            self.grid.place_car(car, Position::Cell(x, y));
        }
        debug!(
            "accident #{} at ({x}, {y}) caused by {id}",
            self.accidents
        );
        let accident = Accident::new(
            (x, y),
            prev_state,
            self.config.car_restart_prob,
            self.config.car_removal_rate,
        );
        let rng = self.child_rng();
        self.actors.spawn(accident_clock(
            accident,
            self.config.clock_unit(),
            rng,
            self.requests_tx.clone(),
        ));
    }

    fn advance(&mut self, id: CarId, from: (usize, usize), (x, y): (usize, usize)) {
        let Some(mut car) = self.grid.take_car(id) else {
            return;
        };
        let leaving_crosswalk = self.grid.location(from.0, from.1).state == LocationState::Crosswalk;
        let pulled_over = self.police_pull_over();
        if (leaving_crosswalk || pulled_over) && !car.slowing_down {
            let slow = SlowDown {
                car: id,
                old_speed: car.speed,
                slow_down_rate: self.config.cross_walk_slow_down_rate,
            };
            car.slowing_down = true;
            car.speed = self.config.slow_down_speed;
            debug!("{id} slowed down (pulled over: {pulled_over})");
            let rng = self.child_rng();
            self.actors.spawn(slowdown_clock(
                slow,
                self.config.clock_unit(),
                rng,
                self.requests_tx.clone(),
            ));
        }
        if self.config.re_sample_speed_every_clk && !car.slowing_down {
            car.speed = self.speeds.sample(&mut self.rng).value;
        }
        self.grid.place_car(car, Position::Cell(x, y));
        self.arm_car(id);
    }

    fn police_pull_over(&mut self) -> bool {
        let prob = self.config.prob_police_pull_over_prob;
        let mut pulled_over = uniform_unit(&mut self.rng) < prob;
        if self.config.speed_based_pull_over && prob > self.speeds.sample(&mut self.rng).density {
            pulled_over = true;
        }
        pulled_over
    }

    fn park(
        &mut self,
        id: CarId,
        from: (usize, usize),
        parking: (usize, usize),
        direction: Direction,
    ) {
        let Some(car) = self.grid.take_car(id) else {
            return;
        };
        self.grid.place_car(car, Position::Cell(parking.0, parking.1));
        debug!("{id} got distracted and parked at {parking:?}");
        self.spawn_parking_clock(ParkingEpisode {
            car: id,
            prev_location: from,
            parking_location: parking,
            parking_time_rate: self.config.parking_time_rate,
            retries: 0,
        });
        if self.config.cross_walk_enabled {
            let flipped =
                self.grid
                    .open_crosswalk_if_needed(parking, direction, self.config.cross_walk_cutoff);
            if flipped > 0 {
                debug!("crosswalk opened beside {parking:?} ({flipped} cells)");
            }
        }
    }

    fn return_from_parking(&mut self, mut episode: ParkingEpisode) -> bool {
        let id = episode.car;
        let (px, py) = episode.parking_location;
        if self.grid.position_of(id) != Some(Position::Cell(px, py)) {
            return false;
        }
        let Some(direction) = self.grid.car(id).map(|car| car.direction) else {
            return false;
        };
        let axis_index = match direction {
            Direction::Horizontal => episode.prev_location.1,
            Direction::Vertical => episode.prev_location.0,
        };
        let open = self.grid.candidate_cells(direction, axis_index, CellFilter::Open);
        let chosen = pick_location(
            &self.grid,
            &open,
            direction,
            self.config.lane_switch_choice,
            &mut self.rng,
        )
        .filter(|&(x, y)| self.grid.location(x, y).is_empty());
        let Some((x, y)) = chosen else {
            episode.retries += 1;
            trace!("{id} found no spot to leave parking (attempt {})", episode.retries);
            self.spawn_parking_clock(episode);
            return false;
        };

        if let Some(car) = self.grid.take_car(id) {
            self.grid.place_car(car, Position::Cell(x, y));
        }
        debug!("{id} left parking for ({x}, {y})");
        self.arm_car(id);
        if self.config.cross_walk_enabled {
            let flipped = self.grid.close_crosswalk_if_needed(
                (px, py),
                direction,
                self.config.cross_walk_cutoff,
            );
            if flipped > 0 {
                debug!("crosswalk beside ({px}, {py}) closed ({flipped} cells)");
            }
        }
        true
    }

    fn clear_accident(&mut self, accident: Accident) -> bool {
        let (x, y) = accident.location;
        self.grid.set_state(x, y, accident.prev_state);
        let involved: Vec<CarId> = self.grid.location(x, y).cars.keys().copied().collect();
        match accident.resolution {
            AccidentResolution::ToBeDeleted => {
                for id in &involved {
                    if let Some(mut car) = self.grid.take_car(*id) {
                        car.state = CarState::Deleted;
                        let direction = car.direction;
                        self.grid.place_car(car, Position::OutRoot(direction));
                    }
                }
                debug!("accident at ({x}, {y}) cleared, {} cars towed", involved.len());
            }
            AccidentResolution::Resolved | AccidentResolution::Unresolved => {
                for id in &involved {
                    self.arm_car(*id);
                }
                debug!("accident at ({x}, {y}) cleared, {} cars restart", involved.len());
            }
        }
        true
    }

    fn end_slowdown(&mut self, slow: SlowDown) -> bool {
        if let Some(car) = self.grid.car_mut(slow.car) {
            car.speed = slow.old_speed;
            car.slowing_down = false;
            trace!("{} back to speed {}", slow.car, slow.old_speed);
        }
        false
    }
}

/// Caller's side of a running simulation.
pub struct SimulationHandle {
    task: JoinHandle<SimulationReport>,
    cancel: watch::Sender<bool>,
    views: watch::Receiver<GridView>,
}

impl SimulationHandle {
    /// The most recently published grid. Two calls with no change in between are equal.
    pub fn snapshot(&self) -> GridView {
        self.views.borrow().clone()
    }

    /// Receiver that wakes on every published change.
    pub fn updates(&self) -> watch::Receiver<GridView> {
        self.views.clone()
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> SimulationResult<SimulationReport> {
        let SimulationHandle { task, cancel, .. } = self;
        let report = task.await?;
        drop(cancel);
        Ok(report)
    }
}

/// Validates `config`, builds the grid and spawns the dispatch loop on the current runtime.
pub fn start(config: SimulationConfig) -> SimulationResult<SimulationHandle> {
    let simulation = Simulation::new(config)?;
    let views = simulation.subscribe();
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(simulation.run(cancel_rx));
    Ok(SimulationHandle {
        task,
        cancel,
        views,
    })
}
