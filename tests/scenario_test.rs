use std::cell::Cell;
use std::rc::Rc;

use conjecture_check::ints::integers;
use conjecture_check::{CheckError, Environment, GenerationError, PropertyChecker, Scenario};

/// A counter that breaks once its total reaches ten.
fn counter() -> impl Fn(&mut Environment<'_>) -> Result<(), GenerationError> {
    let total = Rc::new(Cell::new(0));
    let commands = integers(0, 5).map(move |amount| {
        let total = Rc::clone(&total);
        move |env: &mut Environment<'_>| -> Result<(), GenerationError> {
            env.log_message(format!("add {}", amount));
            total.set(total.get() + amount);
            assert!(total.get() < 10, "total reached {}", total.get());
            Ok(())
        }
    });
    move |env: &mut Environment<'_>| env.execute_commands(&commands)
}

fn amounts(scenario: &Scenario) -> Vec<i32> {
    scenario
        .log()
        .iter()
        .filter_map(|line| line.strip_prefix("add "))
        .map(|amount| amount.parse().unwrap())
        .collect()
}

fn failing_counter(seed: u64) -> conjecture_check::PropertyFailure<Scenario> {
    match PropertyChecker::silently().with_seed(seed).check_scenarios(counter) {
        Err(CheckError::Falsified(failure)) => *failure,
        other => panic!("expected a failing scenario, got {:?}", other.err()),
    }
}

#[test]
fn test_failing_command_is_found_and_shrunk() {
    for seed in 0..5 {
        let failure = failing_counter(seed);
        let first = &failure.first_counter_example.example_value;
        let minimal = &failure.minimal_counter_example.example_value;

        assert!(minimal.log().len() <= first.log().len());
        assert_eq!(amounts(minimal).iter().sum::<i32>(), 10);
        assert_eq!(minimal.failure().unwrap().message, "total reached 10");
        assert_eq!(failure.minimal_counter_example.cause.as_ref(), minimal.failure());
    }
}

/// A counter with two independent bugs: the total limit and a zero amount
/// after any earlier command.
fn counter_with_two_bugs() -> impl Fn(&mut Environment<'_>) -> Result<(), GenerationError> {
    let total = Rc::new(Cell::new(0));
    let steps = Rc::new(Cell::new(0));
    let commands = integers(0, 5).map(move |amount| {
        let total = Rc::clone(&total);
        let steps = Rc::clone(&steps);
        move |env: &mut Environment<'_>| -> Result<(), GenerationError> {
            env.log_message(format!("add {}", amount));
            if amount == 0 && steps.get() > 0 {
                panic!("zero after a command");
            }
            steps.set(steps.get() + 1);
            total.set(total.get() + amount);
            assert!(total.get() < 10, "total reached {}", total.get());
            Ok(())
        }
    });
    move |env: &mut Environment<'_>| env.execute_commands(&commands)
}

#[test]
fn test_shrinking_stays_on_the_first_failing_command() {
    for seed in 0..40 {
        let failure = match PropertyChecker::silently().with_seed(seed).check_scenarios(counter_with_two_bugs) {
            Err(CheckError::Falsified(failure)) => failure,
            other => panic!("expected a failing scenario, got {:?}", other.err()),
        };
        let first = failure.first_counter_example.cause.as_ref().unwrap();
        let minimal = failure.minimal_counter_example.cause.as_ref().unwrap();

        assert!(first.location.as_deref().unwrap().contains("scenario_test.rs"));
        assert_eq!(minimal.location, first.location, "seed {}: {} became {}", seed, first, minimal);
        assert_eq!(
            minimal.message.starts_with("total reached"),
            first.message.starts_with("total reached")
        );
        assert!(failure.stopping_reason.is_none());
    }
}

#[test]
fn test_minimal_scenario_replays_identically() {
    let failure = failing_counter(17);
    let minimal = &failure.minimal_counter_example;
    let replayed = minimal.replay().unwrap();
    assert_eq!(replayed.example_value, minimal.example_value);
    assert_eq!(replayed.example_value.to_string(), minimal.example_value.to_string());
}

#[test]
fn test_factory_runs_once_per_iteration() {
    let built = Rc::new(Cell::new(0));
    let counter = Rc::clone(&built);
    let result = PropertyChecker::silently()
        .with_seed(5)
        .with_iteration_count(20)
        .check_scenarios(move || {
            counter.set(counter.get() + 1);
            |env: &mut Environment<'_>| -> Result<(), GenerationError> {
                let n = env.generate_value(&integers(0, 3), Some("draw {}"))?;
                if n > 1 {
                    env.log_message("big");
                }
                Ok(())
            }
        });
    assert!(result.is_ok());
    assert_eq!(built.get(), 20);
}

#[test]
fn test_failure_report_shows_scenario_log() {
    let failure = failing_counter(2);
    let report = failure.to_string();
    assert!(report.contains("add "));
    assert!(report.contains("total reached 10"));
}
