//! `minidb-client`: a thin interactive line client for the server's text
//! protocol. Reads statements from stdin, writes them to the socket,
//! and echoes whatever comes back until the connection closes.

use std::io::{self, BufRead, Write};
use std::net::TcpStream;

fn main() -> io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let addr = args.get(0).cloned().unwrap_or_else(|| "127.0.0.1:5432".to_string());

    let stream = TcpStream::connect(&addr)?;
    let mut writer = stream.try_clone()?;
    let mut reader = io::BufReader::new(stream);

    let mut banner = String::new();
    reader.read_line(&mut banner)?;
    print!("{}", banner);

    let stdin = io::stdin();
    print!("minidb> ");
    io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;

        let is_quit = matches!(line.trim().to_ascii_lowercase().as_str(), "quit" | "exit");

        let mut response_line = String::new();
        loop {
            response_line.clear();
            let bytes_read = reader.read_line(&mut response_line)?;
            if bytes_read == 0 || response_line == "\n" {
                break;
            }
            print!("{}", response_line);
        }

        if is_quit {
            break;
        }

        print!("minidb> ");
        io::stdout().flush()?;
    }

    Ok(())
}
