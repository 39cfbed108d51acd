//! End-to-end parsing scenarios: text in, tasks/projects/errors out.

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use orgtask::core::{
    Context, ParseErrorKind, Priority, ProjectStatus, PropertyValue, RepeatUnit, Repeater,
    RepeaterKind, Severity, Tag, TaskState, Timestamp,
};
use orgtask::format::render_timestamp;
use orgtask::{ParseOptions, ParseResult, parse, parse_bytes, parse_with_options};
use proptest::prelude::*;

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_ok(text: &str, path: &str) -> ParseResult {
    let result = parse(text, path);
    assert!(
        result.errors.is_empty(),
        "expected no errors, got: {:?}",
        result.errors
    );
    result
}

fn tags(names: &[&str]) -> Vec<Tag> {
    names.iter().map(|n| Tag::from(*n)).collect()
}

// ============================================================================
// Headlines
// ============================================================================

#[test]
fn actionable_task_with_priority_tags_and_schedule() {
    let text = "* actionable [#A] Ship release :work:urgent:\n  SCHEDULED: <2025-01-15>\n";
    let result = parse_ok(text, "/org/inbox.org");

    assert!(result.projects.is_empty());
    assert_eq!(result.tasks.len(), 1);
    let task = &result.tasks[0];
    assert_eq!(task.title, "Ship release");
    assert_eq!(task.state, TaskState::Actionable);
    assert_eq!(task.priority, Some(Priority::A));
    assert_eq!(task.tags, tags(&["work", "urgent"]));
    assert_eq!(task.depth, 1);
    let scheduled = task.scheduled.as_ref().expect("scheduled");
    assert_eq!(scheduled.date, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    assert_eq!(scheduled.time, None);
}

#[test]
fn headline_without_keyword_is_not_started_below_top_level() {
    let result = parse_ok("* Home\n** Fix the sink\n", "/org/home.org");
    assert_eq!(result.tasks[0].state, TaskState::NotStarted);
    assert_eq!(result.tasks[0].project.as_deref(), Some("Home"));
}

#[test]
fn bad_priority_is_a_warning_not_a_failure() {
    let result = parse("* TODO [#Z] Renew passport\n", "/org/home.org");
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].title, "[#Z] Renew passport");
    assert_eq!(result.tasks[0].priority, None);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ParseErrorKind::UnknownPriority('Z'));
    assert_eq!(result.errors[0].severity, Severity::Warning);
    assert!(!result.has_errors());
}

#[test]
fn uppercase_unknown_keyword_warns_and_stays_in_title() {
    let result = parse("* WIP Refactor parser\n", "/org/a.org");
    assert_eq!(result.projects.len(), 1);
    assert_eq!(result.projects[0].title, "WIP Refactor parser");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        result.errors[0].kind,
        ParseErrorKind::UnknownKeyword("WIP".to_string())
    );
    assert_eq!(result.errors[0].severity, Severity::Warning);
    assert_eq!(result.errors[0].column, 3);
}

// ============================================================================
// Projects
// ============================================================================

#[test]
fn top_level_headlines_without_keywords_are_active_projects() {
    let result = parse_ok("* Launch website\n* Renovate kitchen\n", "/org/projects.org");
    assert!(result.tasks.is_empty());
    let titles: Vec<_> = result.projects.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Launch website", "Renovate kitchen"]);
    assert!(
        result
            .projects
            .iter()
            .all(|p| p.status == ProjectStatus::Active)
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn duplicate_effort_keeps_last_value_and_warns() {
    let text = "\
* TODO Write report
:PROPERTIES:
:EFFORT: 90m
:EFFORT: 2h
:END:
";
    let result = parse(text, "/org/work.org");
    assert_eq!(result.tasks[0].effort, 2.0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].severity, Severity::Warning);
    assert_eq!(
        result.errors[0].kind,
        ParseErrorKind::DuplicateProperty("effort".to_string())
    );
    assert_eq!(result.errors[0].line, 4);
}

#[test]
fn effort_and_cost_coercion() {
    let text = "\
* TODO Two hours
:PROPERTIES:
:EFFORT: 2h
:COST: 25.00
:END:
* TODO Half hour
:PROPERTIES:
:EFFORT: 30m
:COST: lots
:END:
";
    let result = parse_ok(text, "/org/a.org");
    assert_eq!(result.tasks[0].effort, 2.0);
    assert_eq!(result.tasks[0].cost, 25.0);
    assert_eq!(result.tasks[1].effort, 0.5);
    assert_eq!(result.tasks[1].cost, 0.0);
    assert_eq!(
        result.tasks[1].properties["cost"],
        PropertyValue::Number(0.0)
    );
}

#[test]
fn context_property_overrides_path() {
    let text = "\
* TODO Buy paint
:PROPERTIES:
:CONTEXT:  Home
:END:
* TODO File expenses
";
    let result = parse_ok(text, "/org/work/tasks.org");
    assert_eq!(result.metadata.default_context, Context::work());
    assert_eq!(result.tasks[0].context, Context::home());
    assert_eq!(result.tasks[1].context, Context::work());
}

#[test]
fn explicit_default_context_beats_path() {
    let options = ParseOptions {
        default_context: Some(Context::new("errands")),
        now: None,
    };
    let result = parse_with_options("* TODO Post office\n", "/org/work.org", &options);
    assert_eq!(result.tasks[0].context.as_str(), "errands");
}

// ============================================================================
// Error recovery
// ============================================================================

#[test]
fn prose_only_input_yields_nothing() {
    let text = "Some notes about the week.\n\nNothing structured here, just thoughts.\n";
    let result = parse(text, "/notes/journal.org");
    assert!(result.tasks.is_empty());
    assert!(result.projects.is_empty());
    assert!(result.errors.is_empty());
    assert_eq!(result.metadata.line_count, 3);
}

#[test]
fn planning_line_before_first_headline_is_an_error() {
    let result = parse("DEADLINE: <2025-01-15>\n* TODO Real task\n", "/org/a.org");
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.has_errors());
    assert_eq!(result.errors[0].line, 1);
}

#[test]
fn invalid_utf8_gives_single_fatal_error() {
    let result = parse_bytes(b"* TODO ok\n\xc3\x28 broken\n", "/org/a.org");
    assert!(result.tasks.is_empty());
    assert!(result.projects.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].severity, Severity::Error);
    assert!(matches!(
        result.errors[0].kind,
        ParseErrorKind::InvalidEncoding(_)
    ));
}

#[test]
fn fixed_clock_makes_output_reproducible() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let options = ParseOptions {
        default_context: None,
        now: Some(now),
    };
    let text = "* Garden\n** DONE Plant tomatoes\n** TODO Water\n";
    let first = parse_with_options(text, "/org/home.org", &options);
    let second = parse_with_options(text, "/org/home.org", &options);
    assert_eq!(first, second);
    assert_eq!(first.tasks[0].completed_at, Some(now));
    assert_eq!(first.tasks[1].completed_at, None);
}

#[test]
fn result_serializes_to_json() {
    let result = parse_ok(
        "* TODO [#B] Call bank :phone:\n:PROPERTIES:\n:EFFORT: 15m\n:END:\n",
        "/org/home.org",
    );
    let json = serde_json::to_value(&result).expect("serialize");
    let task = &json["tasks"][0];
    assert_eq!(task["state"], "not-started");
    assert_eq!(task["priority"], "B");
    assert_eq!(task["context"], "home");
    assert_eq!(task["properties"]["effort"], 0.25);

    let back: ParseResult = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, result);
}

// ============================================================================
// Timestamp round-trip
// ============================================================================

fn repeater_strategy() -> impl Strategy<Value = Option<Repeater>> {
    proptest::option::of((0usize..3, 1i32..100, 0usize..4).prop_map(|(kind, count, unit)| {
        Repeater {
            kind: [
                RepeaterKind::FromLast,
                RepeaterKind::FromBase,
                RepeaterKind::FromNow,
            ][kind],
            count,
            unit: [
                RepeatUnit::Day,
                RepeatUnit::Week,
                RepeatUnit::Month,
                RepeatUnit::Year,
            ][unit],
        }
    }))
}

proptest! {
    #[test]
    fn scheduled_timestamp_survives_render_and_reparse(
        offset in 0u64..60_000,
        time in proptest::option::of((0u32..24, 0u32..60)),
        repeater in repeater_strategy(),
    ) {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let mut ts = Timestamp::on(epoch.checked_add_days(Days::new(offset)).unwrap());
        if let Some((h, m)) = time {
            ts = ts.at(NaiveTime::from_hms_opt(h, m, 0).unwrap());
        }
        ts.repeater = repeater;

        let text = format!("* TODO Repeat\nSCHEDULED: {}\n", render_timestamp(&ts));
        let first = parse(&text, "/org/a.org");
        prop_assert!(first.errors.is_empty());
        let parsed = first.tasks[0].scheduled.clone().expect("scheduled");
        prop_assert_eq!(&parsed, &ts);

        let again = format!("* TODO Repeat\nSCHEDULED: {}\n", render_timestamp(&parsed));
        let second = parse(&again, "/org/a.org");
        prop_assert_eq!(second.tasks[0].scheduled.as_ref(), Some(&ts));
    }
}

// ============================================================================
// Context override and robustness
// ============================================================================

fn path_strategy() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec(
            prop_oneof!["work", "home", "Work", "HOME", "notes", "[a-z]{1,8}"],
            0..4,
        ),
        prop_oneof!["work", "home", "inbox", "[a-z]{1,8}"],
    )
        .prop_map(|(dirs, stem)| {
            let mut path = String::from("/");
            for dir in dirs {
                path.push_str(&dir);
                path.push('/');
            }
            path.push_str(&stem);
            path.push_str(".org");
            path
        })
}

fn org_line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "\\*{1,4} (TODO |NEXT |DONE |[A-Z]{2,5} )?(\\[#[A-Z]\\] )?[a-zA-Z ]{0,12}(:[a-z]{1,5}:)?",
        "[ ]{0,2}:(PROPERTIES|END|LOGBOOK|EFFORT|COST|CONTEXT):[ a-z0-9$.:]{0,10}",
        "(SCHEDULED|DEADLINE|CLOSED): [<\\[][0-9]{4}-[0-9]{2}-[0-9]{2}( [A-Za-z]{3})?( [0-9]{1,2}:[0-9]{2})?( \\.?\\+{1,2}[0-9][dwmy])?[>\\]]",
        "\\PC{0,30}",
    ]
}

proptest! {
    #[test]
    fn context_property_always_beats_path_default(
        path in path_strategy(),
        value in "[ ]{0,2}[A-Za-z0-9_ -]{0,12}",
    ) {
        let text = format!("* TODO Task\n:PROPERTIES:\n:CONTEXT: {value}\n:END:\n");
        let result = parse(&text, &path);
        prop_assert_eq!(result.tasks.len(), 1);
        prop_assert_eq!(&result.tasks[0].context, &Context::new(&value));
    }

    #[test]
    fn any_outline_parses_to_a_result(lines in proptest::collection::vec(org_line_strategy(), 0..30)) {
        let text = lines.join("\n");
        let result = parse(&text, "/org/fuzz.org");
        prop_assert_eq!(result.metadata.line_count, text.lines().count());
        for error in &result.errors {
            prop_assert!(error.line >= 1 && error.line <= result.metadata.line_count);
            prop_assert!(error.column >= 1);
        }
    }

    #[test]
    fn any_bytes_parse_to_a_result(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let result = parse_bytes(&bytes, "/org/fuzz.org");
        if std::str::from_utf8(&bytes).is_err() {
            prop_assert!(result.tasks.is_empty() && result.projects.is_empty());
            prop_assert_eq!(result.errors.len(), 1);
            prop_assert!(result.has_errors());
        }
    }
}
