//! User-message text fed back to the backend after each cycle.

use crate::core::types::CommandResult;

/// Feedback after executing `command`. Contains stdout verbatim on success and
/// stderr verbatim on failure.
pub fn command_feedback(command: &str, result: &CommandResult) -> String {
    if result.succeeded {
        format!(
            "[success] Command executed successfully: {command}\nResult:\n{}",
            or_placeholder(&result.stdout, "(no output)")
        )
    } else {
        format!(
            "[failure] Command failed: {command}\nError:\n{}",
            or_placeholder(&result.stderr, "(no error output)")
        )
    }
}

/// Notice sent instead of re-running a command already executed this session.
pub fn duplicate_feedback(command: &str) -> String {
    format!(
        "[already executed] The command `{command}` was already run in this session and its \
         result is already in the conversation above. Do not repeat it. Propose a different \
         command, or produce the final findings table if you have enough evidence."
    )
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    if text.trim().is_empty() {
        placeholder
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_feedback_contains_stdout_verbatim() {
        let text = command_feedback(
            "kubectl get pods --all-namespaces",
            &CommandResult::success("pod-a Running"),
        );
        assert!(text.starts_with("[success]"));
        assert!(text.contains("pod-a Running"));
        assert!(!text.contains("[failure]"));
    }

    #[test]
    fn failure_feedback_contains_stderr_verbatim() {
        let text = command_feedback(
            "kubectl logs missing",
            &CommandResult::failure("Error from server (NotFound): pods \"missing\" not found"),
        );
        assert!(text.starts_with("[failure]"));
        assert!(text.contains("Error from server (NotFound)"));
    }

    #[test]
    fn empty_output_gets_placeholder() {
        let text = command_feedback("kubectl get pods", &CommandResult::success(""));
        assert!(text.contains("(no output)"));
    }

    #[test]
    fn duplicate_feedback_names_command() {
        let text = duplicate_feedback("kubectl get nodes");
        assert!(text.contains("`kubectl get nodes`"));
        assert!(text.contains("already"));
    }
}
