use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(merge_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(base) = merge_home {
        return Some(base.join(".env"));
    }
    Some(home_dir?.join(".chat-merge/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("CHAT_MERGE_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn merge_home_takes_precedence() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/workspace/merge")),
            Some(PathBuf::from("/home/alice")),
        );
        assert_eq!(got, Some(PathBuf::from("/workspace/merge/.env")));
    }

    #[test]
    fn falls_back_to_home_dir() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        assert_eq!(got, Some(PathBuf::from("/home/alice/.chat-merge/.env")));
    }

    #[test]
    fn no_home_no_fallback() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
