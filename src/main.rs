use clap::Parser;
use galaxy_review::*;
use bitbucket::BitbucketClient;
use config::ReviewConfig;
use context::ContextRetriever;
use diff::FileChangeSet;
use error::Result;
use feedback::FeedbackCollector;
use finetune::ModelFineTuner;
use rayon::prelude::*;
use types::{Args, ReviewComment};

/// Apply CLI overrides to config
fn apply_cli_overrides(config: &mut ReviewConfig, args: &Args) {
   if let Some(ref model) = args.model {
      config.reviewer_model = model.clone();
   }
   if let Some(temp) = args.temperature {
      if (0.0..=1.0).contains(&temp) {
         config.temperature = temp;
      } else {
         eprintln!(
            "Warning: Temperature {} out of range [0.0, 1.0], using default {}",
            temp, config.temperature
         );
      }
   }
}

/// Load config from args or default
fn load_config_from_args(args: &Args) -> Result<ReviewConfig> {
   if let Some(ref config_path) = args.config {
      ReviewConfig::from_file(config_path)
   } else {
      ReviewConfig::load()
   }
}

/// Cap the changed-file list at --max-files, keeping diff order.
fn cap_files(files: Vec<(String, FileChangeSet)>, max_files: Option<usize>) -> Vec<(String, FileChangeSet)> {
   match max_files {
      Some(limit) if files.len() > limit => {
         style::warn(&format!("Reviewing first {limit} of {} changed files", files.len()));
         files.into_iter().take(limit).collect()
      },
      _ => files,
   }
}

/// Main review pipeline: fetch PR and diff → parse → review files in
/// parallel → post comments serially in diff order.
fn run_review(config: &ReviewConfig, args: &Args) -> Result<()> {
   let client = BitbucketClient::new(config)?;

   let pr = style::with_spinner_result(&format!("Fetching pull request #{}", args.pr), || {
      client.get_pull_request(&args.repo, args.pr)
   })?;
   println!("Reviewing PR #{}: {}", pr.id, style::bold(&pr.title));
   println!("Using reviewer model: {} (temp: {})", style::model(&config.reviewer_model), config.temperature);

   let diff_text = style::with_spinner_result("Fetching diff", || {
      client.get_pull_request_diff(&args.repo, args.pr)
   })?;

   let parsed = diff::parse(&diff_text)?;
   if parsed.is_empty() {
      style::print_info("No reviewable changes in this pull request");
      return Ok(());
   }

   let files = cap_files(parsed.into_iter().collect(), args.max_files);
   println!("{} Reviewing {} changed file(s)...", style::icons::SEARCH, files.len());

   let retriever = ContextRetriever::new(&client, config);

   // Context retrieval and review run per file in parallel; posting stays
   // serial below so comments land in diff order.
   let reviewed: Vec<(String, Vec<ReviewComment>)> = files
      .par_iter()
      .map(|(file_path, records)| {
         let context = retriever.get_context(&args.repo, &pr, file_path);
         match review::review(file_path, records, &context, config) {
            Ok(comments) => (file_path.clone(), comments),
            Err(e) => {
               style::warn(&format!("Review failed for {file_path}: {e}"));
               (file_path.clone(), Vec::new())
            },
         }
      })
      .collect();

   let width = style::term_width();
   let mut posted = 0;

   for (file_path, comments) in &reviewed {
      if comments.is_empty() {
         println!("{} {} — no findings", style::icons::SUCCESS, style::dim(file_path));
         continue;
      }

      println!("\n{}", style::section_header(file_path, width));
      let payloads = format::format_comments(comments, file_path, args.pr, config);

      for (comment, payload) in comments.iter().zip(&payloads) {
         println!(
            "  {} line {}: [{}] {}",
            style::icons::BULLET,
            comment.line,
            style::severity(comment.severity.as_str()),
            comment.content.lines().next().unwrap_or_default()
         );

         if args.debug {
            println!("{}", style::dim(&serde_json::to_string_pretty(payload)?));
         }

         if args.dry_run {
            continue;
         }

         match client.post_comment(&args.repo, args.pr, payload) {
            Ok(_) => posted += 1,
            Err(e) => style::warn(&format!(
               "Failed to post comment on {file_path} line {}: {e}",
               comment.line
            )),
         }
      }
   }

   println!("\n{}", style::separator(width));
   if args.dry_run {
      let total: usize = reviewed.iter().map(|(_, c)| c.len()).sum();
      println!("{} Dry run: {} comment(s) not posted", style::icons::INFO, total);
   } else {
      println!("{} Posted {} review comment(s)", style::success(style::icons::SUCCESS), posted);
   }

   Ok(())
}

/// Harvest reactions on past review comments and print feedback stats.
fn run_collect_feedback(config: &ReviewConfig, args: &Args) -> Result<()> {
   let client = BitbucketClient::new(config)?;
   let collector = FeedbackCollector::new(config)?;

   let stored = style::with_spinner_result("Collecting reaction feedback", || {
      collector.collect_reactions_feedback(&client, &args.repo, args.pr)
   })?;
   println!("{} Stored {} new feedback record(s)", style::icons::SAVE, stored);

   let stats = collector.get_feedback_stats()?;
   let width = style::term_width();
   println!("\n{}", style::section_header("Feedback stats", width));
   println!("  Total comments:  {}", stats.total_comments);
   println!("  Average rating:  {}", stats.average_rating);
   println!("  Helpful:         {}%", stats.helpful_percentage);
   println!("  Accepted:        {}%", stats.acceptance_rate);
   for (emoji, count) in &stats.reaction_counts {
      println!("  {emoji}  {count}");
   }

   Ok(())
}

/// Prepare training data from stored feedback and run the fine-tuning flow.
fn run_finetune(config: &ReviewConfig, args: &Args) -> Result<()> {
   let collector = FeedbackCollector::new(config)?;
   let records = collector.get_all_feedback()?;
   println!("Loaded {} feedback record(s)", records.len());

   let tuner = ModelFineTuner::new(config);
   let Some(training_file) = tuner.prepare_training_data(&records)? else {
      return Ok(());
   };

   let job = tuner.start_fine_tuning(&training_file)?;
   let status = tuner.check_fine_tuning_status(&job.job_id);
   println!("Job {} status: {}", status.job_id, style::bold(&status.status));

   if status.status == "succeeded"
      && let Some(model) = status.fine_tuned_model
   {
      let config_path = match args.config {
         Some(ref path) => path.clone(),
         None => ReviewConfig::default_config_path()?,
      };
      tuner.update_model_in_config(&config_path, &model)?;
      println!("{} Reviewer now uses {}", style::success(style::icons::SUCCESS), style::model(&model));
   }

   Ok(())
}

fn main() -> Result<()> {
   dotenvy::dotenv().ok();
   let args = Args::parse();

   // Load config and apply CLI overrides
   let mut config = load_config_from_args(&args)?;
   apply_cli_overrides(&mut config, &args);

   if args.collect_feedback {
      return run_collect_feedback(&config, &args);
   }
   if args.finetune {
      return run_finetune(&config, &args);
   }

   run_review(&config, &args)
}

#[cfg(test)]
mod tests {
   use super::*;

   // ========== apply_cli_overrides Tests ==========

   #[test]
   fn test_apply_cli_overrides_model() {
      let mut config = ReviewConfig::default();
      let args = Args { model: Some("gpt-4".to_string()), ..Default::default() };
      apply_cli_overrides(&mut config, &args);
      assert_eq!(config.reviewer_model, "gpt-4");
   }

   #[test]
   fn test_apply_cli_overrides_temperature_in_range() {
      let mut config = ReviewConfig::default();
      let args = Args { temperature: Some(0.7), ..Default::default() };
      apply_cli_overrides(&mut config, &args);
      assert_eq!(config.temperature, 0.7);
   }

   #[test]
   fn test_apply_cli_overrides_temperature_out_of_range_kept_default() {
      let mut config = ReviewConfig::default();
      let default_temp = config.temperature;
      let args = Args { temperature: Some(3.5), ..Default::default() };
      apply_cli_overrides(&mut config, &args);
      assert_eq!(config.temperature, default_temp);
   }

   #[test]
   fn test_apply_cli_overrides_noop_without_flags() {
      let mut config = ReviewConfig::default();
      let expected_model = config.reviewer_model.clone();
      apply_cli_overrides(&mut config, &Args::default());
      assert_eq!(config.reviewer_model, expected_model);
   }

   // ========== cap_files Tests ==========

   fn fake_files(n: usize) -> Vec<(String, FileChangeSet)> {
      (0..n).map(|i| (format!("file{i}.py"), Vec::new())).collect()
   }

   #[test]
   fn test_cap_files_under_limit_unchanged() {
      let files = cap_files(fake_files(3), Some(5));
      assert_eq!(files.len(), 3);
   }

   #[test]
   fn test_cap_files_truncates_keeping_order() {
      let files = cap_files(fake_files(5), Some(2));
      assert_eq!(files.len(), 2);
      assert_eq!(files[0].0, "file0.py");
      assert_eq!(files[1].0, "file1.py");
   }

   #[test]
   fn test_cap_files_no_limit() {
      let files = cap_files(fake_files(4), None);
      assert_eq!(files.len(), 4);
   }
}
