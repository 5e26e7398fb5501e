/// Split a compound flag string into individual arguments.
///
/// `"-c:v copy"` becomes `["-c:v", "copy"]`. Runs of whitespace collapse and
/// a blank token yields nothing. Quotes are not interpreted.
pub fn split_args(token: &str) -> impl Iterator<Item = String> + '_ {
    token.split_whitespace().map(str::to_string)
}

/// Render an argument vector as a copy-pasteable shell line.
pub(crate) fn render_command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/=+%@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args_compound_flag() {
        let parts: Vec<String> = split_args("-c:v copy").collect();
        assert_eq!(parts, vec!["-c:v", "copy"]);
    }

    #[test]
    fn test_split_args_collapses_whitespace() {
        let parts: Vec<String> = split_args("  -i\tin.mp4 \n -y ").collect();
        assert_eq!(parts, vec!["-i", "in.mp4", "-y"]);
    }

    #[test]
    fn test_split_args_blank_token() {
        assert_eq!(split_args("").count(), 0);
        assert_eq!(split_args("   ").count(), 0);
    }

    #[test]
    fn test_render_command_line() {
        let args = vec![
            "ffmpeg".to_string(),
            "-i".to_string(),
            "my clip.mp4".to_string(),
            "-metadata".to_string(),
            "title=it's".to_string(),
            String::new(),
        ];
        assert_eq!(
            render_command_line(&args),
            r"ffmpeg -i 'my clip.mp4' -metadata 'title=it'\''s' ''"
        );
    }
}
