/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Title(String),
    List(String),
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };
        match name {
            "title" => Self::Title(argument.to_string()),
            "list" => Self::List(argument.to_string()),
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent_trimmed() {
        assert_eq!(Command::parse("  hello there \n"), Command::Send("hello there".to_string()));
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn slash_commands_take_the_rest_as_argument() {
        assert_eq!(Command::parse("/title  Trip plans "), Command::Title("Trip plans".to_string()));
        assert_eq!(Command::parse("/list"), Command::List(String::new()));
        assert_eq!(Command::parse("/list rust"), Command::List("rust".to_string()));
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/nope x"), Command::Unknown("nope".to_string()));
    }
}
