//! The `psytest score` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use psytest_core::collector::AnswerCollector;
use psytest_core::content::ContentModel;
use psytest_core::parser::parse_answer_sheet;
use psytest_core::scoring::ScoreSheet;

pub fn execute(bundle_path: PathBuf, answers_path: PathBuf, format: String) -> Result<()> {
    let model = super::load_model(&bundle_path)?;
    let sheet = parse_answer_sheet(&answers_path)?;

    let mut collector = AnswerCollector::new();
    for (question_id, answer_ids) in sheet {
        if model.question(question_id).is_none() {
            eprintln!("warning: ignoring answers for unknown question {question_id}");
            continue;
        }
        match model.check_selection(question_id, &answer_ids) {
            Ok(selection) => collector.save(question_id, selection),
            Err(e) => eprintln!("warning: ignoring answers for question {question_id}: {e}"),
        }
    }
    let widened = collector.widen(&model);
    let scores = ScoreSheet::compute(&model, &widened.answers);

    match format.as_str() {
        "json" => {
            let out = serde_json::json!({
                "answers": widened.answers,
                "gaps": widened.gaps,
                "scores": scores.iter().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            println!("Test: {}", model.test().title);
            print_table(&model, &scores);
            for issue in scores.iter().flat_map(|s| &s.issues) {
                println!("  {issue}");
            }
        }
    }

    for gap in &widened.gaps {
        eprintln!("warning: {gap}");
    }
    Ok(())
}

fn print_table(model: &ContentModel, scores: &ScoreSheet) {
    let mut table = Table::new();
    table.set_header(vec!["Scale", "Name", "Type", "Raw", "Questions", "Suspect"]);

    for score in scores.iter() {
        let name = model
            .scale(score.scale_id)
            .map(|s| s.pole1.clone())
            .unwrap_or_default();
        let scale_type = score
            .scale_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(score.scale_id),
            Cell::new(name),
            Cell::new(scale_type),
            Cell::new(score.raw),
            Cell::new(score.contributing_questions),
            Cell::new(if score.suspect { "yes" } else { "" }),
        ]);
    }

    println!("{table}");
}
