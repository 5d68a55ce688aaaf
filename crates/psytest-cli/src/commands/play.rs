//! The `psytest play` command: administer a test on the terminal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use psytest_client::config::{create_source, load_config_from};
use psytest_core::delivery::DeliveryState;
use psytest_core::model::SessionInfo;
use psytest_core::session::Session;

type Input = Lines<BufReader<Stdin>>;

enum Event {
    Line(String),
    Timer,
    Closed,
}

pub async fn execute(
    test_id: u64,
    user_id: u64,
    token: String,
    email: String,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let source = create_source(&config);
    let info = SessionInfo {
        test_id,
        user_id,
        email,
        token,
    };

    let mut session = Session::open(source, info, config.session_config())
        .await
        .context("failed to open the test session")?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let test = session.machine().model().test();
    println!("{}", test.title);
    if !test.instructions.is_empty() {
        println!("\n{}", test.instructions);
    }
    session.machine_mut().start_test()?;

    let mut shown = None;
    while session.state() != DeliveryState::Completed {
        let view = (
            session.state(),
            session.machine().block_index(),
            session.machine().question_index(),
        );
        if shown != Some(view) {
            if view.0 == DeliveryState::BlockIntro && !session.prefetch_images().await {
                tracing::debug!("block changed while its images were loading");
            }
            render(&session);
            shown = Some(view);
        }

        match next_event(&mut session, &mut input).await? {
            Event::Timer => report_time(&session),
            Event::Closed => anyhow::bail!("input closed before the test was completed"),
            Event::Line(line) => {
                if handle_line(&mut session, line.trim())? {
                    shown = None;
                }
            }
        }
    }

    println!("\nTest completed. Saving results...");
    submit(&mut session, &mut input).await
}

/// Wait for a line of input, or for the countdown while one is running.
async fn next_event(session: &mut Session, input: &mut Input) -> Result<Event> {
    let machine = session.machine();
    let timed = match machine.state() {
        DeliveryState::InProgress => machine.time_left().is_some(),
        DeliveryState::GracePeriod => true,
        _ => false,
    };

    if !timed {
        return read_event(input.next_line().await);
    }
    tokio::select! {
        line = input.next_line() => read_event(line),
        _ = session.wait_timer() => Ok(Event::Timer),
    }
}

fn read_event(line: std::io::Result<Option<String>>) -> Result<Event> {
    Ok(match line.context("failed to read input")? {
        Some(line) => Event::Line(line),
        None => Event::Closed,
    })
}

/// Apply one line of input. Returns `true` if the screen should be redrawn.
fn handle_line(session: &mut Session, line: &str) -> Result<bool> {
    let machine = session.machine_mut();
    match machine.state() {
        DeliveryState::BlockIntro => {
            machine.start_block()?;
            Ok(false)
        }
        DeliveryState::InProgress => {
            let outcome = match line {
                "q" | "quit" => anyhow::bail!("test abandoned"),
                "n" | "next" | "" => machine.next(),
                "p" | "prev" => machine.prev(),
                choices => {
                    let picks: Vec<usize> = choices
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .filter_map(|s| s.parse().ok())
                        .collect();
                    let Some(question) = machine.current_question().cloned() else {
                        return Ok(false);
                    };
                    if picks.is_empty() {
                        println!("  Enter answer numbers, n for next, p for previous, q to quit.");
                        return Ok(false);
                    }
                    let mut outcome = Ok(());
                    for pick in picks {
                        match question.answers.get(pick.wrapping_sub(1)) {
                            Some(&answer_id) => {
                                if let Err(e) = machine.toggle_answer(question.question_id, answer_id)
                                {
                                    outcome = Err(e);
                                    break;
                                }
                            }
                            None => println!("  There is no answer {pick}."),
                        }
                    }
                    if outcome.is_ok() {
                        return Ok(true);
                    }
                    outcome
                }
            };
            if let Err(e) = outcome {
                println!("  {e}");
            }
            Ok(false)
        }
        DeliveryState::GracePeriod | DeliveryState::BlockTimeout => {
            println!("  Time is up for this block, please wait.");
            Ok(false)
        }
        DeliveryState::NotStarted | DeliveryState::Completed => Ok(false),
    }
}

fn render(session: &Session) {
    let machine = session.machine();
    let model = machine.model();

    match machine.state() {
        DeliveryState::BlockIntro => {
            let Some(block) = machine.current_block() else {
                return;
            };
            println!(
                "\n== Block {} of {}: {} ==",
                machine.block_index() + 1,
                model.blocks().len(),
                block.name
            );
            if !block.instructions.is_empty() {
                println!("{}", block.instructions);
            }
            if let Some(seconds) = machine.config().countdown_secs(block) {
                println!("You have {seconds} seconds for this block.");
            }
            println!("Press Enter to begin.");
        }
        DeliveryState::InProgress => {
            let (Some(presented), Some(progress)) =
                (machine.current_question(), machine.block_progress())
            else {
                return;
            };
            let Some(question) = model.question(presented.question_id) else {
                return;
            };
            let position = machine.question_index() + 1;
            let total = machine.current_layout().map_or(0, |l| l.len());
            let time = machine
                .time_left()
                .map(|s| format!(", {s}s left"))
                .unwrap_or_default();
            println!(
                "\nQuestion {position}/{total} ({}/{} answered{time})",
                progress.answered, progress.total
            );
            println!("{}", question.text);
            if question.image_url.is_some() {
                match session.image(question.id) {
                    Some(bytes) => println!("[image, {} bytes]", bytes.len()),
                    None => println!("[image unavailable]"),
                }
            }

            let selected = machine.collector().get(question.id);
            for (i, &answer_id) in presented.answers.iter().enumerate() {
                let mark = if selected.contains(&answer_id) { "x" } else { " " };
                let text = model.answer(answer_id).map_or("", |a| a.text.as_str());
                println!("  [{mark}] {}. {text}", i + 1);
            }
        }
        DeliveryState::GracePeriod => {
            println!("\nTime is up. The next block starts shortly.");
        }
        DeliveryState::NotStarted | DeliveryState::BlockTimeout | DeliveryState::Completed => {}
    }
}

fn report_time(session: &Session) {
    let machine = session.machine();
    if machine.state() != DeliveryState::InProgress {
        return;
    }
    if let Some(remaining) = machine.time_left() {
        if remaining > 0 && (remaining % 30 == 0 || remaining == 10 || remaining == 5) {
            println!("  ({remaining}s left)");
        }
    }
}

/// Submit, offering to retry on failure.
async fn submit(session: &mut Session, input: &mut Input) -> Result<()> {
    loop {
        match session.submit().await {
            Ok(receipt) => {
                let result = receipt.final_result.clone();
                println!("Results saved.");
                if !result.is_null() {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                break;
            }
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => {
                println!("{e}\nRetry? [Y/n]");
                match read_event(input.next_line().await)? {
                    Event::Line(answer) if !answer.trim().eq_ignore_ascii_case("n") => continue,
                    _ => anyhow::bail!("results were not saved"),
                }
            }
        }
    }

    for gap in session.gaps() {
        eprintln!("warning: {gap}");
    }
    Ok(())
}
