//! Population-mode evaluation: lockstep generations and the cross-generation orchestrator.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    Episode, EpisodeResult, EvaluatedGenome, EvolutionConfig, FitnessEvaluator, Generation,
    GenerationControl, GenomeId, PopulationOptimizer, SensorArray, SimulationError, TerminalCause,
    Track, TrackPilotConfig, TrainingSink,
};

/// Fitness and trajectory of one genome in one generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenomeScore {
    pub id: GenomeId,
    pub fitness: f32,
    pub result: EpisodeResult,
}

/// Counts of terminal causes across a generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CauseCounts {
    pub off_road: usize,
    pub reached_goal: usize,
    pub stuck_timeout: usize,
    pub step_budget_exhausted: usize,
}

impl CauseCounts {
    fn record(&mut self, cause: TerminalCause) {
        match cause {
            TerminalCause::OffRoad => self.off_road += 1,
            TerminalCause::ReachedGoal => self.reached_goal += 1,
            TerminalCause::StuckTimeout => self.stuck_timeout += 1,
            TerminalCause::StepBudgetExhausted => self.step_budget_exhausted += 1,
        }
    }
}

/// Outcome of evaluating one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationReport {
    pub generation: Generation,
    /// Lockstep ticks executed before every episode had terminated.
    pub ticks: u32,
    pub scores: Vec<GenomeScore>,
    pub causes: CauseCounts,
}

impl GenerationReport {
    /// Highest-scoring genome, if any.
    #[must_use]
    pub fn best(&self) -> Option<&GenomeScore> {
        self.scores
            .iter()
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
    }

    #[must_use]
    pub fn mean_fitness(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().map(|s| s.fitness).sum::<f32>() / self.scores.len() as f32
    }

    #[must_use]
    pub const fn reached_goal(&self) -> usize {
        self.causes.reached_goal
    }
}

struct Lane<'g, G> {
    genome: &'g mut G,
    episode: Episode,
}

/// Advances a whole population through one track in lockstep.
#[derive(Debug, Clone)]
pub struct GenerationRunner {
    config: TrackPilotConfig,
    sensors: SensorArray,
    evaluator: FitnessEvaluator,
}

impl GenerationRunner {
    pub fn new(config: &TrackPilotConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self {
            sensors: SensorArray::new(&config.sensors),
            evaluator: FitnessEvaluator::new(config),
            config: config.clone(),
        })
    }

    #[must_use]
    pub const fn evaluator(&self) -> &FitnessEvaluator {
        &self.evaluator
    }

    #[must_use]
    pub const fn sensors(&self) -> &SensorArray {
        &self.sensors
    }

    /// Run one episode per genome until all have terminated, then write each genome's fitness.
    pub fn evaluate<G: EvaluatedGenome>(
        &self,
        generation: Generation,
        track: &Track,
        genomes: &mut [G],
    ) -> Result<GenerationReport, SimulationError> {
        if genomes.is_empty() {
            return Err(SimulationError::EmptyPopulation);
        }

        let template = Episode::spawn(track, &self.config.control, &self.config.termination)?;
        let mut lanes: Vec<Lane<'_, G>> = genomes
            .iter_mut()
            .map(|genome| Lane {
                genome,
                episode: template.clone(),
            })
            .collect();

        let budget = self.config.termination.step_budget;
        let sensors = &self.sensors;
        let mut ticks = 0u32;
        while ticks < budget && lanes.iter().any(|lane| lane.episode.is_running()) {
            lanes
                .par_iter_mut()
                .filter(|lane| lane.episode.is_running())
                .try_for_each(|lane| {
                    lane.episode
                        .step_steering(track, sensors, lane.genome.policy_mut())
                        .map(|_| ())
                })?;
            ticks += 1;
        }

        let mut causes = CauseCounts::default();
        let mut scores = Vec::with_capacity(lanes.len());
        for lane in lanes {
            let result = lane.episode.result();
            let fitness = self.evaluator.evaluate(&result);
            lane.genome.set_fitness(fitness);
            causes.record(result.terminal_cause);
            debug!(
                generation = generation.0,
                genome = lane.genome.id().0,
                cause = result.terminal_cause.as_str(),
                steps = result.steps_survived,
                fitness,
                "genome evaluated",
            );
            scores.push(GenomeScore {
                id: lane.genome.id(),
                fitness,
                result,
            });
        }

        Ok(GenerationReport {
            generation,
            ticks,
            scores,
            causes,
        })
    }
}

/// Result of a full evolution run.
#[derive(Debug)]
pub struct EvolutionOutcome<G> {
    pub best: Option<G>,
    pub generations_run: u32,
    pub best_fitness: Option<f32>,
    pub goal_reached: bool,
    /// Best fitness observed in each generation, in order.
    pub fitness_history: Vec<f32>,
}

/// Cross-generation orchestrator. Owns the generation counter and best-so-far state.
#[derive(Debug, Clone)]
pub struct Evolution {
    runner: GenerationRunner,
    settings: EvolutionConfig,
    generation: Generation,
    best_fitness: Option<f32>,
    goal_reached: bool,
}

impl Evolution {
    pub fn new(config: &TrackPilotConfig) -> Result<Self, SimulationError> {
        Ok(Self {
            runner: GenerationRunner::new(config)?,
            settings: config.evolution.clone(),
            generation: Generation::default(),
            best_fitness: None,
            goal_reached: false,
        })
    }

    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub const fn best_fitness(&self) -> Option<f32> {
        self.best_fitness
    }

    #[must_use]
    pub const fn runner(&self) -> &GenerationRunner {
        &self.runner
    }

    /// Hand the evaluation callback to `optimizer` and drive it for the configured generations.
    pub fn run<O: PopulationOptimizer>(
        &mut self,
        optimizer: &mut O,
        track: &Track,
        sink: &mut dyn TrainingSink,
    ) -> Result<EvolutionOutcome<O::Genome>, SimulationError> {
        let Self {
            runner,
            settings,
            generation,
            best_fitness,
            goal_reached,
        } = self;
        let goal_floor = runner.evaluator().goal_floor();
        let mut generations_run = 0u32;
        let mut fitness_history = Vec::new();

        let best = optimizer.evolve(settings.generations, |genomes| {
            let report = runner.evaluate(*generation, track, genomes)?;
            let generation_best = report.best().map(|score| score.fitness);
            if let Some(fitness) = generation_best {
                fitness_history.push(fitness);
                if best_fitness.is_none_or(|best| fitness > best) {
                    *best_fitness = Some(fitness);
                }
                if fitness >= goal_floor {
                    *goal_reached = true;
                }
            }

            info!(
                generation = generation.0,
                population = report.scores.len(),
                ticks = report.ticks,
                best = generation_best.unwrap_or(f32::NAN),
                mean = report.mean_fitness(),
                reached_goal = report.causes.reached_goal,
                off_road = report.causes.off_road,
                stuck = report.causes.stuck_timeout,
                "generation complete",
            );
            sink.on_generation(&report);

            *generation = generation.next();
            generations_run += 1;
            if settings.stop_on_goal && report.reached_goal() > 0 {
                info!(generation = generation.0, "goal reached; stopping evolution");
                return Ok(GenerationControl::Stop);
            }
            Ok(GenerationControl::Continue)
        })?;

        Ok(EvolutionOutcome {
            best,
            generations_run,
            best_fitness: *best_fitness,
            goal_reached: *goal_reached,
            fitness_history,
        })
    }
}
