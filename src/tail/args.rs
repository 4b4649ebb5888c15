use std::ffi::OsString;
use std::path::PathBuf;

/// Where the subprocess starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStart {
    /// First line of the file (`-n +1`).
    Beginning,
    /// 1-based byte position (`-c +N`), i.e. skip `N - 1` bytes.
    BytePosition(u64),
    /// Only bytes appended after the process starts (`-n 0`).
    End,
}

impl TailStart {
    /// Maps an HTTP `start` parameter onto a start position. `0` and absent
    /// both mean the beginning.
    pub fn from_query(start: Option<u64>) -> Self {
        match start {
            Some(position) if position > 0 => TailStart::BytePosition(position),
            _ => TailStart::Beginning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMode {
    /// Read to EOF and exit.
    None,
    /// Keep reading the opened file (`-f`).
    Descriptor,
    /// Keep reading the path, reopening it when it is replaced (`-F`).
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailArgs {
    pub path: PathBuf,
    pub start: TailStart,
    pub follow: FollowMode,
}

impl TailArgs {
    pub fn new(path: impl Into<PathBuf>, start: TailStart, follow: FollowMode) -> Self {
        Self {
            path: path.into(),
            start,
            follow,
        }
    }

    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(4);
        match self.follow {
            FollowMode::None => {}
            FollowMode::Descriptor => args.push("-f".into()),
            FollowMode::Name => args.push("-F".into()),
        }
        match self.start {
            TailStart::Beginning => {
                args.push("-n".into());
                args.push("+1".into());
            }
            TailStart::BytePosition(position) => {
                args.push("-c".into());
                args.push(format!("+{}", position.max(1)).into());
            }
            TailStart::End => {
                args.push("-n".into());
                args.push("0".into());
            }
        }
        args.push(self.path.clone().into_os_string());
        args
    }

    /// Lossy rendering of the argument list for status reporting.
    pub fn display_args(&self) -> Vec<String> {
        self.to_args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}
