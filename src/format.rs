//! Bitbucket comment formatting.
//!
//! Turns structured review findings into inline comment payloads with
//! severity labels, category badges and an optional feedback footer.

use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{
   config::ReviewConfig,
   types::{CommentPayload, InlineAnchor, PayloadContent, ReviewComment, Severity},
};

/// Format review comments for one file as Bitbucket inline comment payloads.
pub fn format_comments(
   comments: &[ReviewComment],
   file_path: &str,
   pr_id: u64,
   config: &ReviewConfig,
) -> Vec<CommentPayload> {
   comments
      .iter()
      .map(|comment| {
         let local_id = Uuid::new_v4().to_string();
         let mut raw = format!(
            "{} {}\n\n{}",
            severity_label(comment.severity),
            category_badge(&comment.category),
            comment.content
         );

         if config.feedback_enable_links {
            if config.feedback_use_reactions {
               raw.push_str(REACTION_FOOTER);
            } else {
               raw.push_str(&link_footer(&config.feedback_server_url, &local_id, pr_id));
            }
         }

         CommentPayload {
            local_id,
            content: PayloadContent { raw: normalize_text(&raw) },
            inline: InlineAnchor { path: file_path.to_string(), to: Some(comment.line) },
         }
      })
      .collect()
}

/// Emoji-prefixed label for a severity level.
fn severity_label(severity: Severity) -> &'static str {
   match severity {
      Severity::Info => "💡 Info",
      Severity::Warning => "⚠️ Warning",
      Severity::Error => "🛑 Error",
   }
}

/// Markdown badge for a finding category, with a generic fallback for
/// categories the model invents.
fn category_badge(category: &str) -> String {
   match category {
      "security" => "🔒 **Security**".to_string(),
      "performance" => "⚡ **Performance**".to_string(),
      "style" => "🎨 **Style**".to_string(),
      "bug" => "🐛 **Bug**".to_string(),
      "logic" => "🧠 **Logic**".to_string(),
      "maintainability" => "🔧 **Maintainability**".to_string(),
      "test" => "🧪 **Testing**".to_string(),
      "documentation" => "📝 **Documentation**".to_string(),
      other => {
         let mut chars = other.chars();
         let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => "General".to_string(),
         };
         format!("**{capitalized}**")
      },
   }
}

/// Footer asking reviewers to rate the comment with a reaction emoji.
const REACTION_FOOTER: &str = "\n\n---\n📊 **Was this comment helpful?** React with an \
                               emoji:\n👍 - Helpful and implemented\n❤️ - Very helpful\n🚀 - \
                               Good suggestion\n👀 - Seen but not applicable\n👎 - Not helpful";

/// Footer with clickable feedback links pointing at the feedback server.
fn link_footer(server_url: &str, comment_id: &str, pr_id: u64) -> String {
   format!(
      "\n\n---\n📊 **Was this comment helpful?** [👍 \
       Yes]({server_url}/feedback/helpful?id={comment_id}&pr={pr_id}) | [👎 \
       No]({server_url}/feedback/not-helpful?id={comment_id}&pr={pr_id})"
   )
}

/// NFC-normalize text and strip control characters Bitbucket rejects,
/// keeping newlines and tabs.
fn normalize_text(text: &str) -> String {
   text
      .nfc()
      .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
      .collect()
}
