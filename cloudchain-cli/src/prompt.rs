use std::io::{self, BufRead, IsTerminal, Write};

/// Reads one line from stdin without echoing it. The prompt goes to stderr.
pub(crate) fn prompt_hidden(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = String::new();
    let read = read_hidden_line(&mut line);
    eprintln!();
    read?;
    trim_newline(&mut line);
    Ok(line)
}

/// Asks the operator to type `word`. Refuses outright when stdin is not a
/// terminal.
pub(crate) fn confirm_typed(message: &str, word: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Err(io::Error::other(
            "refusing to continue without confirmation in non-interactive mode; pass --yes",
        ));
    }
    eprintln!("{message}");
    eprint!("Type '{word}' to confirm: ");
    io::stderr().flush()?;

    let mut input = String::new();
    stdin.lock().read_line(&mut input)?;
    Ok(input.trim() == word)
}

fn trim_newline(line: &mut String) {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
}

#[cfg(unix)]
fn read_hidden_line(buf: &mut String) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        stdin.lock().read_line(buf)?;
        return Ok(());
    }

    let fd = stdin.as_raw_fd();
    // SAFETY: all-zero is a valid termios; tcgetattr overwrites it.
    let mut original = unsafe { std::mem::zeroed::<libc::termios>() };
    // SAFETY: fd is stdin and `original` is writable.
    if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut silent = original;
    silent.c_lflag &= !libc::ECHO;
    // SAFETY: fd is stdin and `silent` came from tcgetattr.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &silent) } != 0 {
        return Err(io::Error::last_os_error());
    }

    struct EchoGuard {
        fd: i32,
        original: libc::termios,
    }

    impl Drop for EchoGuard {
        fn drop(&mut self) {
            // SAFETY: restores the settings read by tcgetattr above.
            let _ = unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.original) };
        }
    }

    let _guard = EchoGuard { fd, original };
    stdin.lock().read_line(buf)?;
    Ok(())
}

// TODO: hide input on Windows consoles as well (SetConsoleMode).
#[cfg(not(unix))]
fn read_hidden_line(buf: &mut String) -> io::Result<()> {
    io::stdin().lock().read_line(buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::trim_newline;

    #[test]
    fn trims_both_line_endings() {
        let mut s = "secret\r\n".to_string();
        trim_newline(&mut s);
        assert_eq!(s, "secret");

        let mut s = "keep inner\nspace\n".to_string();
        trim_newline(&mut s);
        assert_eq!(s, "keep inner\nspace");
    }
}
