use std::io;
use std::thread;
use std::time::Duration;

use crate::signal::StopSignal;

/// Something that can tell whether a key has been pressed. Must not block.
#[cfg_attr(test, mockall::automock)]
pub trait KeySource {
    fn is_pressed(&mut self, key: char) -> io::Result<bool>;
}

impl<F> KeySource for F
where
    F: FnMut(char) -> io::Result<bool>,
{
    fn is_pressed(&mut self, key: char) -> io::Result<bool> {
        (self)(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The key was seen and this watcher raised the signal.
    KeyPressed,
    /// Somebody else raised the signal first.
    Interrupted,
}

/// Polls a [`KeySource`] until the stop key shows up.
pub struct TerminationWatcher<K> {
    keys: K,
    key: char,
    poll: Duration,
}

impl<K: KeySource> TerminationWatcher<K> {
    pub const DEFAULT_POLL: Duration = Duration::from_millis(1);

    pub fn new(keys: K, key: char) -> Self {
        Self {
            keys,
            key,
            poll: Self::DEFAULT_POLL,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Blocks until the key is pressed or `stop` is raised elsewhere.
    ///
    /// A failing key source is logged once and then treated as "never
    /// pressed", leaving other stop paths (Ctrl+C) in charge.
    pub fn watch(mut self, stop: &StopSignal) -> WatchOutcome {
        let mut source_ok = true;

        while !stop.is_set() {
            if source_ok {
                match self.keys.is_pressed(self.key) {
                    Ok(true) => {
                        return if stop.set() {
                            WatchOutcome::KeyPressed
                        } else {
                            WatchOutcome::Interrupted
                        };
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("key source failed, no longer polling it: {e}");
                        source_ok = false;
                    }
                }
            }
            thread::sleep(self.poll);
        }

        WatchOutcome::Interrupted
    }
}

#[cfg(unix)]
pub use terminal::TerminalKeys;

#[cfg(unix)]
mod terminal {
    use std::io;
    use std::mem::MaybeUninit;

    use super::KeySource;

    /// Keys typed on stdin.
    ///
    /// When stdin is a terminal it is put in non-canonical, no-echo mode so
    /// single keys arrive without Enter; the original mode is restored on
    /// drop. Signals stay enabled so Ctrl+C still works.
    pub struct TerminalKeys {
        saved: Option<libc::termios>,
        closed: bool,
    }

    impl TerminalKeys {
        pub fn stdin() -> io::Result<Self> {
            let fd = libc::STDIN_FILENO;
            let mut saved = None;

            if unsafe { libc::isatty(fd) } == 1 {
                let mut term = MaybeUninit::<libc::termios>::uninit();
                if unsafe { libc::tcgetattr(fd, term.as_mut_ptr()) } != 0 {
                    return Err(io::Error::last_os_error());
                }
                let original = unsafe { term.assume_init() };

                let mut raw = original;
                raw.c_lflag &= !(libc::ICANON | libc::ECHO);
                raw.c_cc[libc::VMIN] = 0;
                raw.c_cc[libc::VTIME] = 0;
                if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
                    return Err(io::Error::last_os_error());
                }
                saved = Some(original);
            } else {
                tracing::debug!("stdin is not a terminal, reading keys from it as-is");
            }

            Ok(Self {
                saved,
                closed: false,
            })
        }

        fn readable(&self) -> io::Result<bool> {
            let mut fds = libc::pollfd {
                fd: libc::STDIN_FILENO,
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut fds, 1, 0) };
            if rc < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(e);
            }
            Ok(rc > 0 && fds.revents & (libc::POLLIN | libc::POLLHUP) != 0)
        }
    }

    impl KeySource for TerminalKeys {
        fn is_pressed(&mut self, key: char) -> io::Result<bool> {
            if self.closed || !self.readable()? {
                return Ok(false);
            }

            let mut buf = [0u8; 64];
            let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
            if n < 0 {
                let e = io::Error::last_os_error();
                return match e.kind() {
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Ok(false),
                    _ => Err(e),
                };
            }
            if n == 0 {
                tracing::debug!("stdin closed, the stop key can no longer arrive");
                self.closed = true;
                return Ok(false);
            }

            let mut encoded = [0u8; 4];
            let needle = key.encode_utf8(&mut encoded).as_bytes();
            Ok(buf[..n as usize]
                .windows(needle.len())
                .any(|w| w == needle))
        }
    }

    impl Drop for TerminalKeys {
        fn drop(&mut self) {
            if let Some(original) = self.saved.take() {
                unsafe {
                    libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &original);
                }
            }
        }
    }
}
