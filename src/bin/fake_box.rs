use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const VERSION_BANNER: &[u8] = b"RFB 003.008\n";
const SECURITY_TYPES: [u8; 2] = [0x01, 0x01];
const SECURITY_RESULT_OK: [u8; 4] = [0x00; 4];
const SERVER_INIT: [u8; 24] = [0x00; 24];
const KEY_EVENT: u8 = 0x04;
const KEY_FRAME_LEN: usize = 8;

struct Options {
    port: u16,
    probe_port: Option<u16>,
}

fn parse_options() -> Result<Options, Box<dyn std::error::Error>> {
    let mut options = Options {
        port: 5900,
        probe_port: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => options.port = args.next().ok_or("--port needs a value")?.parse()?,
            "--probe-port" => {
                options.probe_port = Some(args.next().ok_or("--probe-port needs a value")?.parse()?)
            }
            other => return Err(format!("unknown argument {other}").into()),
        }
    }
    Ok(options)
}

async fn handshake<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(VERSION_BANNER).await?;
    let mut echo = [0u8; VERSION_BANNER.len()];
    stream.read_exact(&mut echo).await?;
    if &echo[..] != VERSION_BANNER {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected banner echo, got {echo:?}"),
        ));
    }
    println!("<- banner echo");

    stream.write_all(&SECURITY_TYPES).await?;
    let mut chosen = [0u8; 1];
    stream.read_exact(&mut chosen).await?;
    println!("<- security type {}", chosen[0]);

    stream.write_all(&SECURITY_RESULT_OK).await?;
    println!("-> security result ok");
    stream.write_all(&SERVER_INIT).await?;
    println!("-> server init");
    stream.flush().await
}

async fn print_keys<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame = [0u8; KEY_FRAME_LEN];
    loop {
        match reader.read_exact(&mut frame).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
        if frame[0] != KEY_EVENT {
            println!("<- unknown frame {frame:02x?}");
            continue;
        }
        let code = u16::from_be_bytes([frame[6], frame[7]]);
        let phase = if frame[1] == 0x01 { "down" } else { "up" };
        println!("<- key {code:04x} {phase}");
    }
}

async fn handle(mut stream: TcpStream, peer: SocketAddr) {
    println!("fake-box: client {peer} connected");
    if let Err(err) = handshake(&mut stream).await {
        eprintln!("fake-box: handshake with {peer} failed: {err}");
        return;
    }
    println!("fake-box: {peer} ready");
    if let Err(err) = print_keys(&mut stream).await {
        eprintln!("fake-box: {peer} read failed: {err}");
    }
    println!("fake-box: client {peer} left");
}

async fn serve_description(port: u16) -> std::io::Result<()> {
    use axum::{routing::get, Router};
    let app = Router::new().route(
        "/DeviceDescription.xml",
        get(|| async {
            (
                [("content-type", "text/xml")],
                "<root><device><friendlyName>fake-box</friendlyName></device></root>",
            )
        }),
    );
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    println!("fake-box: answering power probes on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options()?;

    if let Some(probe_port) = options.probe_port {
        tokio::spawn(async move {
            if let Err(err) = serve_description(probe_port).await {
                eprintln!("fake-box: power probe endpoint failed: {err}");
            }
        });
    }

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, options.port)).await?;
    println!("fake-box: listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle(stream, peer));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await
}
