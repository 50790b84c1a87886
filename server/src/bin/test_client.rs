//! Headless login client: sends one `CA_LOGIN` to an auth server and
//! prints the outcome.

use clap::Parser;
use shared::packets::auth::{AcAcceptLogin, AcRefuseLogin, CaLogin};
use shared::{FixedString, Packet, PacketVersion};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Auth server address
    #[clap(short, long, default_value = "127.0.0.1:6900")]
    address: String,
    #[clap(short, long)]
    username: String,
    #[clap(short, long)]
    password: String,
    /// Client version sent with the login
    #[clap(long, default_value_t = PacketVersion::DEFAULT.0)]
    version: u32,
}

async fn read_reply(stream: &mut TcpStream) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut opcode = [0u8; 2];
    stream.read_exact(&mut opcode).await?;
    let opcode = u16::from_le_bytes(opcode);

    let mut frame = opcode.to_le_bytes().to_vec();
    let len = if opcode == AcAcceptLogin::OPCODE {
        let mut len = [0u8; 2];
        stream.read_exact(&mut len).await?;
        frame.extend_from_slice(&len);
        u16::from_le_bytes(len) as usize
    } else if opcode == AcRefuseLogin::OPCODE {
        23
    } else {
        return Err(format!("unexpected reply opcode {:#06x}", opcode).into());
    };

    let mut rest = vec![0u8; len.saturating_sub(frame.len())];
    stream.read_exact(&mut rest).await?;
    frame.extend_from_slice(&rest);
    Ok(frame)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.address).await?;
    println!("Connected to {}", args.address);

    let login = CaLogin {
        version: args.version,
        username: FixedString::new(&args.username),
        password: FixedString::new(&args.password),
        client_type: 0,
    };
    stream.write_all(&login.serialize()?).await?;

    let frame = timeout(Duration::from_secs(10), read_reply(&mut stream)).await??;
    if frame[..2] == AcAcceptLogin::OPCODE.to_le_bytes() {
        let accepted = AcAcceptLogin::deserialize(&frame)?;
        println!(
            "Login accepted: account {}, auth code {}",
            accepted.account_id, accepted.auth_code
        );
        for server in &accepted.servers {
            let [a, b, c, d] = server.ip.to_le_bytes();
            println!(
                "  {} at {}.{}.{}.{}:{} ({} users)",
                server.name.as_str(),
                a,
                b,
                c,
                d,
                server.port,
                server.users
            );
        }
    } else {
        let refused = AcRefuseLogin::deserialize(&frame)?;
        println!("Login refused with code {}", refused.error);
    }
    Ok(())
}
