//! Per-file review context assembly.
//!
//! Everything here degrades gracefully: a failed lookup produces an empty
//! section and a warning, never an aborted review.

use indexmap::IndexMap;

use crate::{
   bitbucket::BitbucketClient,
   config::ReviewConfig,
   style,
   types::{Commit, PullRequest},
};

/// Context handed to the reviewer agent for one changed file.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
   /// Full file text at the PR source branch (empty for deleted files).
   pub file_content:   String,
   /// Import lines extracted from the file content.
   pub imports:        Vec<String>,
   /// Sibling-directory and test files, path → content.
   pub related_files:  IndexMap<String, String>,
   /// Recent commits touching this file.
   pub file_history:   Vec<Commit>,
   pub pr_description: String,
}

/// Retrieves review context for changed files through the Bitbucket API.
pub struct ContextRetriever<'a> {
   api:    &'a BitbucketClient,
   config: &'a ReviewConfig,
}

impl<'a> ContextRetriever<'a> {
   pub const fn new(api: &'a BitbucketClient, config: &'a ReviewConfig) -> Self {
      Self { api, config }
   }

   /// Assemble context for one file of a pull request.
   pub fn get_context(&self, repo_slug: &str, pr: &PullRequest, file_path: &str) -> FileContext {
      let file_content = self.file_content(repo_slug, pr, file_path);
      let imports = extract_imports(file_path, &file_content);
      let related_files = self.related_files(repo_slug, pr, file_path);
      let file_history = self.file_history(repo_slug, file_path);

      FileContext {
         file_content,
         imports,
         related_files,
         file_history,
         pr_description: pr.description.clone(),
      }
   }

   fn file_content(&self, repo_slug: &str, pr: &PullRequest, file_path: &str) -> String {
      let branch = pr.source_branch();
      if branch.is_none() {
         style::warn("Could not determine source branch for PR, using default branch");
      }

      match self.api.get_file_content(repo_slug, file_path, branch) {
         Ok(content) => content,
         Err(e) => {
            style::warn(&format!("Failed to get content for {file_path}: {e}"));
            String::new()
         },
      }
   }

   fn related_files(
      &self,
      repo_slug: &str,
      pr: &PullRequest,
      file_path: &str,
   ) -> IndexMap<String, String> {
      let mut related = IndexMap::new();
      let branch = pr.source_branch();

      // Files from the same directory, capped so one review doesn't drag in
      // a whole tree.
      if let Some(directory) = parent_dir(file_path) {
         match self.api.list_directory(repo_slug, directory, branch) {
            Ok(entries) => {
               for sibling in entries
                  .iter()
                  .filter(|p| p.as_str() != file_path)
                  .take(self.config.max_related_files)
               {
                  if let Ok(content) = self.api.get_file_content(repo_slug, sibling, branch)
                     && !content.is_empty()
                  {
                     related.insert(sibling.clone(), content);
                  }
               }
            },
            Err(e) => {
               style::warn(&format!("Failed to list directory {directory}: {e}"));
            },
         }
      }

      // Test files matching common naming patterns. Missing files are the
      // normal case, so lookup errors stay silent here.
      for candidate in test_file_candidates(file_path) {
         if let Ok(content) = self.api.get_file_content(repo_slug, &candidate, branch)
            && !content.is_empty()
         {
            related.insert(candidate, content);
            break;
         }
      }

      related
   }

   fn file_history(&self, repo_slug: &str, file_path: &str) -> Vec<Commit> {
      match self
         .api
         .get_file_commits(repo_slug, file_path, self.config.file_history_limit)
      {
         Ok(commits) => commits,
         Err(e) => {
            style::warn(&format!("Failed to get commit history for {file_path}: {e}"));
            Vec::new()
         },
      }
   }
}

/// Extract import lines from file content, keyed on the file extension.
pub fn extract_imports(file_path: &str, content: &str) -> Vec<String> {
   if content.is_empty() {
      return Vec::new();
   }

   let lines = content.lines().map(str::trim);

   if file_path.ends_with(".py") {
      lines
         .filter(|l| l.starts_with("import ") || l.starts_with("from "))
         .map(String::from)
         .collect()
   } else if file_path.ends_with(".js") || file_path.ends_with(".ts") {
      lines
         .filter(|l| {
            l.starts_with("import ") || (l.starts_with("const ") && l.contains("require("))
         })
         .map(String::from)
         .collect()
   } else if file_path.ends_with(".rs") {
      lines
         .filter(|l| l.starts_with("use ") || l.starts_with("pub use "))
         .map(String::from)
         .collect()
   } else {
      Vec::new()
   }
}

/// Directory part of a path, or None for top-level files.
fn parent_dir(file_path: &str) -> Option<&str> {
   match file_path.rsplit_once('/') {
      Some((dir, _)) if !dir.is_empty() => Some(dir),
      _ => None,
   }
}

/// Candidate test file paths for a source file, by common naming conventions.
fn test_file_candidates(file_path: &str) -> Vec<String> {
   let filename = file_path.rsplit('/').next().unwrap_or(file_path);
   let base_name = filename.split('.').next().unwrap_or(filename);

   let stems = [
      format!("test_{base_name}"),
      format!("{base_name}_test"),
      format!("tests/{base_name}_test"),
      format!("tests/test_{base_name}"),
   ];

   let mut candidates = Vec::new();
   for stem in &stems {
      for ext in [".py", ".js", ".ts", ".java", ".go", ".rs"] {
         candidates.push(format!("{stem}{ext}"));
      }
   }
   candidates
}
