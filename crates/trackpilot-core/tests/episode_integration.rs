use trackpilot_core::{
    DiscreteAction, DiscretePolicy, Episode, Position, SensorArray, SimulationError, StartPose,
    SteeringPolicy, TerminalCause, Track, TrackPilotConfig,
};

struct Always(DiscreteAction);

impl DiscretePolicy for Always {
    fn choose(&mut self, _observation: &[f32]) -> Result<usize, SimulationError> {
        Ok(self.0.index())
    }
}

struct Straight;

impl SteeringPolicy for Straight {
    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
        assert_eq!(observation.len(), 11);
        Ok(vec![0.0, 1.0])
    }
}

fn corridor(centre_y: u32, start: StartPose, goal: Option<Position>) -> Track {
    let mut track = Track::unpainted(1000, 1000, start, goal).expect("track");
    track.paint_rect(0, centre_y - 20, 1000, centre_y + 20);
    track
}

#[test]
fn forward_driver_reaches_goal_down_the_corridor() {
    let config = TrackPilotConfig::default();
    let track = corridor(
        100,
        StartPose::new(100.0, 100.0, 0.0),
        Some(Position::new(900.0, 100.0)),
    );
    let sensors = SensorArray::new(&config.sensors);
    let episode =
        Episode::spawn(&track, &config.control, &config.termination).expect("spawn");

    let result = episode
        .run_discrete(&track, &sensors, &mut Always(DiscreteAction::Forward))
        .expect("run");

    assert_eq!(result.terminal_cause, TerminalCause::ReachedGoal);
    assert!(result.steps_survived <= 154);
    assert_eq!(result.initial_distance_to_goal, Some(800.0));
    assert!(result.min_distance_to_goal.expect("goal") <= config.termination.capture_radius);
}

#[test]
fn heading_away_from_the_corridor_leaves_the_road() {
    let config = TrackPilotConfig::default();
    // Heading 90 degrees points screen-up, across the 40 pixel corridor.
    let track = corridor(500, StartPose::new(500.0, 500.0, 90.0), None);
    let sensors = SensorArray::new(&config.sensors);
    let episode =
        Episode::spawn(&track, &config.control, &config.termination).expect("spawn");

    let result = episode
        .run_discrete(&track, &sensors, &mut Always(DiscreteAction::Forward))
        .expect("run");

    assert_eq!(result.terminal_cause, TerminalCause::OffRoad);
    assert!(result.steps_survived <= 5, "took {} ticks", result.steps_survived);
}

#[test]
fn turning_in_place_times_out_as_stuck() {
    let config = TrackPilotConfig::default();
    let track = corridor(100, StartPose::new(100.0, 100.0, 0.0), None);
    let sensors = SensorArray::new(&config.sensors);
    let episode =
        Episode::spawn(&track, &config.control, &config.termination).expect("spawn");

    let result = episode
        .run_discrete(&track, &sensors, &mut Always(DiscreteAction::TurnLeft))
        .expect("run");

    assert_eq!(result.terminal_cause, TerminalCause::StuckTimeout);
    assert_eq!(result.steps_survived, config.termination.stagnation_ticks);
    assert_eq!(result.min_distance_to_goal, None);
}

#[test]
fn open_arena_without_obstacles_exhausts_the_budget() {
    let mut config = TrackPilotConfig::default();
    config.termination.step_budget = 100;
    let mut track = Track::open_arena();
    track.set_goal(None);
    let sensors = SensorArray::new(&config.sensors);
    let episode =
        Episode::spawn(&track, &config.control, &config.termination).expect("spawn");

    let result = episode
        .run_steering(&track, &sensors, &mut Straight)
        .expect("run");

    assert_eq!(result.terminal_cause, TerminalCause::StepBudgetExhausted);
    assert_eq!(result.steps_survived, 100);
    assert!((result.final_position.x - 400.0).abs() < 1e-3);
}

#[test]
fn stroke_painted_track_spawns_along_the_first_segment() {
    let config = TrackPilotConfig::default();
    let points = [
        Position::new(100.0, 300.0),
        Position::new(100.0, 100.0),
        Position::new(500.0, 100.0),
    ];
    let start = Track::start_from_stroke(&points).expect("start");
    let mut track = Track::unpainted(600, 400, start, Some(Position::new(500.0, 100.0)))
        .expect("track");
    track.paint_stroke(&points, 25.0);

    assert!((start.heading - 90.0).abs() < 1e-3, "first segment points screen-up");
    let sensors = SensorArray::new(&config.sensors);
    let episode =
        Episode::spawn(&track, &config.control, &config.termination).expect("spawn");
    let result = episode
        .run_discrete(&track, &sensors, &mut Always(DiscreteAction::Forward))
        .expect("run");
    // Driving straight up overshoots the corner and leaves the painted road.
    assert_eq!(result.terminal_cause, TerminalCause::OffRoad);
    assert!(result.min_distance_to_goal.expect("goal") < 500.0);
}

#[test]
fn unpainted_start_without_nearby_road_is_rejected() {
    let config = TrackPilotConfig::default();
    let mut track = Track::unpainted(
        1000,
        1000,
        StartPose::new(100.0, 100.0, 0.0),
        None,
    )
    .expect("track");
    track.paint_rect(600, 600, 700, 700);

    let error = Episode::spawn(&track, &config.control, &config.termination)
        .expect_err("no spawn");
    assert!(matches!(error, SimulationError::NoDrivableSpawn { .. }));
}

mod evolution {
    use trackpilot_core::{
        EvaluatedGenome, Evolution, GenerationControl, GenerationReport, GenomeId,
        PopulationOptimizer, Position, SimulationError, StartPose, SteeringPolicy, Track,
        TrackPilotConfig, TrainingSink,
    };

    struct Throttle(f32);

    impl SteeringPolicy for Throttle {
        fn act(&mut self, _observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
            Ok(vec![0.0, self.0])
        }
    }

    struct Genome {
        id: GenomeId,
        policy: Throttle,
        fitness: Option<f32>,
    }

    impl EvaluatedGenome for Genome {
        fn id(&self) -> GenomeId {
            self.id
        }

        fn policy_mut(&mut self) -> &mut dyn SteeringPolicy {
            &mut self.policy
        }

        fn set_fitness(&mut self, fitness: f32) {
            self.fitness = Some(fitness);
        }

        fn fitness(&self) -> Option<f32> {
            self.fitness
        }
    }

    /// Raises every genome's throttle a notch per generation.
    struct Ramp {
        genomes: Vec<Genome>,
    }

    impl PopulationOptimizer for Ramp {
        type Genome = Genome;

        fn evolve<F>(
            &mut self,
            generations: u32,
            mut evaluate: F,
        ) -> Result<Option<Genome>, SimulationError>
        where
            F: FnMut(&mut [Genome]) -> Result<GenerationControl, SimulationError>,
        {
            let mut best: Option<(GenomeId, f32, f32)> = None;
            for _ in 0..generations {
                let control = evaluate(&mut self.genomes)?;
                for genome in &self.genomes {
                    let fitness = genome.fitness.unwrap_or(f32::NEG_INFINITY);
                    if best.is_none_or(|(_, score, _)| fitness > score) {
                        best = Some((genome.id, fitness, genome.policy.0));
                    }
                }
                if control == GenerationControl::Stop {
                    break;
                }
                for genome in &mut self.genomes {
                    genome.policy.0 += 0.1;
                    genome.fitness = None;
                }
            }
            Ok(best.map(|(id, fitness, throttle)| Genome {
                id,
                policy: Throttle(throttle),
                fitness: Some(fitness),
            }))
        }
    }

    #[derive(Default)]
    struct Recorder {
        generations: Vec<GenerationReport>,
    }

    impl TrainingSink for Recorder {
        fn on_generation(&mut self, report: &GenerationReport) {
            self.generations.push(report.clone());
        }
    }

    fn corridor() -> Track {
        let mut track = Track::unpainted(
            1000,
            200,
            StartPose::new(100.0, 100.0, 0.0),
            Some(Position::new(900.0, 100.0)),
        )
        .expect("track");
        track.paint_rect(0, 80, 1000, 120);
        track
    }

    #[test]
    fn evolution_stops_once_a_genome_reaches_the_goal() {
        let mut config = TrackPilotConfig::default();
        config.termination.step_budget = 400;
        config.evolution.generations = 20;
        let mut optimizer = Ramp {
            genomes: (0..4)
                .map(|idx| Genome {
                    id: GenomeId(idx),
                    policy: Throttle(0.05 * idx as f32),
                    fitness: None,
                })
                .collect(),
        };
        let mut sink = Recorder::default();
        let mut evolution = Evolution::new(&config).expect("evolution");

        let outcome = evolution
            .run(&mut optimizer, &corridor(), &mut sink)
            .expect("run");

        // Throttle 0.15 + 0.1 * g gives speed 3 * throttle; 800 - 30 units within 400 ticks
        // needs speed >= 1.925, first reached by genome 3 in generation 5.
        assert!(outcome.goal_reached);
        assert_eq!(outcome.generations_run, 6);
        assert_eq!(evolution.generation().0, 6);
        assert_eq!(sink.generations.len(), 6);
        assert_eq!(sink.generations[5].causes.reached_goal, 1);
        assert!(outcome.fitness_history.windows(2).all(|w| w[1] >= w[0]));
        let best = outcome.best.expect("best genome");
        assert_eq!(best.id, GenomeId(3));
        assert!(best.fitness.expect("fitness") >= 10_000.0);
    }
}
