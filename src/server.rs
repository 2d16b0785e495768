//! Line oriented TCP front end.
//!
//! Every request line gets exactly one reply line: `DONE`, a value, `ON`/`OFF`
//! or `error: <reason>`.

use std::{
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    command::{Command, Lane},
    config::{ServerConfig, to_std},
    dispatcher::Dispatcher,
    error::DispatchError,
    factory::{CommandFactory, CommandRegistry},
};

/// Parses request lines, routes them and renders the replies.
pub struct RequestHandler {
    factory: CommandFactory,
    dispatcher: Arc<Dispatcher>,
}

impl RequestHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, registry: CommandRegistry) -> Self {
        let factory = CommandFactory::new(registry, Arc::clone(dispatcher.apply_guards()));
        Self {
            factory,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Reply to one request, without the line terminator.
    pub fn handle_line(&self, line: &str) -> String {
        let command = match self.factory.parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!("rejected '{}': {}", line.trim(), e);
                return format!("error: {e}");
            }
        };
        self.run(command)
            .unwrap_or_else(|e| format!("error: {e}"))
    }

    fn run(&self, command: Command) -> Result<String, DispatchError> {
        // A set is answered from the cache while the write waits its turn.
        if let Some((update, parameter)) = command.split_set() {
            let update = Arc::new(update);
            self.dispatcher.submit(Arc::clone(&update))?;
            self.dispatcher.drain(Lane::Fast);
            update.wait();
            // Claimed only now, so a pending apply is sure to see this value.
            let apply = Command::apply(parameter, self.factory.guards());
            self.dispatcher.submit(Arc::new(apply))?;
            return Ok(update.response());
        }

        let command = Arc::new(command);
        if command.reports_result() {
            Ok(self.dispatcher.execute(command)?.response())
        } else {
            self.dispatcher.submit(command)?;
            Ok("DONE".to_string())
        }
    }
}

/// Stops a running [`Server::serve`] loop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

pub struct Server {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    accept_poll: Duration,
    stop: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: &ServerConfig, handler: RequestHandler) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address)?;
        listener.set_nonblocking(true)?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            accept_poll: to_std(config.accept_poll),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Accept connections until stopped, one thread per client.
    pub fn serve(&self) -> std::io::Result<()> {
        while !self.stop.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.spawn_client(stream, peer) {
                        warn!("dropping {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(self.accept_poll);
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    std::thread::sleep(self.accept_poll);
                }
            }
        }
        info!("server stopped");
        Ok(())
    }

    fn spawn_client(&self, stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        let handler = Arc::clone(&self.handler);
        std::thread::Builder::new()
            .name(format!("client-{peer}"))
            .spawn(move || {
                info!("{} connected", peer);
                if let Err(e) = serve_client(stream, &handler) {
                    warn!("{}: {}", peer, e);
                }
                info!("{} disconnected", peer);
            })?;
        Ok(())
    }
}

fn serve_client(stream: TcpStream, handler: &RequestHandler) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    for line in BufReader::new(stream).lines() {
        let line = line?;
        let reply = handler.handle_line(&line);
        debug!("'{}' -> '{}'", line.trim(), reply);
        writer.write_all(reply.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use fugit::MillisDurationU32;

    use super::*;
    use crate::{
        config::DispatcherConfig,
        mock_serial::SimulatedPsu,
        psu::Hm305,
        register::Hm305Register,
    };

    fn handler(sim: &SimulatedPsu) -> RequestHandler {
        let psu: Hm305<SimulatedPsu> = Hm305::new(sim.clone(), 0x01);
        let config = DispatcherConfig {
            idle_tick: MillisDurationU32::millis(20),
        };
        let dispatcher = Arc::new(Dispatcher::start(psu, &config).unwrap());
        RequestHandler::new(dispatcher, CommandRegistry::hm305())
    }

    #[test]
    fn set_replies_from_cache_then_writes() {
        let sim = SimulatedPsu::new();
        let handler = handler(&sim);

        assert_eq!(handler.handle_line("VOLTage 12.5"), "12.500");
        assert_eq!(handler.handle_line("VOLTage:SETPoint?"), "12.500");
        handler.dispatcher().drain(Lane::Serial);
        assert_eq!(sim.register(Hm305Register::SetVoltage), Some(1250));
    }

    #[test]
    fn replies_for_each_kind() {
        let sim = SimulatedPsu::new();
        let handler = handler(&sim);

        assert_eq!(handler.handle_line("MODel?"), "3010");
        assert_eq!(handler.handle_line("PROTection?"), "NONE");
        assert_eq!(handler.handle_line("BEEPer?"), "ON");
        assert_eq!(handler.handle_line("BEEPer OFF"), "DONE");
        assert_eq!(handler.handle_line("BEEPer?"), "OFF");
        assert_eq!(handler.handle_line("CURRent:SETPoint 1.5"), "1.500");
        assert_eq!(handler.handle_line("CURRent:INCRement 0.25"), "1.750");
        assert_eq!(handler.handle_line("CURRent:APPLY"), "DONE");
        assert_eq!(handler.handle_line("OUTput ON"), "DONE");
        assert_eq!(handler.handle_line("CURRent?"), "1.750");
    }

    #[test]
    fn concurrent_sets_settle_on_the_last_value() {
        let sim = SimulatedPsu::new();
        let handler = Arc::new(handler(&sim));

        let clients: Vec<_> = (0..4)
            .map(|client| {
                let handler = Arc::clone(&handler);
                std::thread::spawn(move || {
                    for step in 0..25 {
                        let value = f64::from(client * 25 + step) / 10.0 + 1.0;
                        handler.handle_line(&format!("VOLTage {value}"));
                    }
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }
        handler.dispatcher().drain(Lane::Serial);

        let cached = handler.handle_line("VOLTage:SETPoint?");
        let written = sim.register(Hm305Register::SetVoltage).unwrap();
        assert_eq!(cached, format!("{:.3}", f64::from(written) / 100.0));
    }

    #[test]
    fn errors_become_error_lines() {
        let sim = SimulatedPsu::new();
        let handler = handler(&sim);

        assert_eq!(handler.handle_line("VOLT AGE"), "error: cmd not found: VOLT");
        assert_eq!(handler.handle_line("VOLTage abc"), "error: bad float");
        assert_eq!(handler.handle_line("OUTput maybe"), "error: bad on/off");
        assert!(handler.handle_line("VOLTage 1 2").starts_with("error: syntax error"));
        assert_eq!(handler.handle_line(""), "error: syntax error: empty request");

        handler.dispatcher().shutdown();
        assert_eq!(
            handler.handle_line("MODel?"),
            "error: dispatcher is shutting down"
        );
    }

    #[test]
    fn output_over_tcp() {
        let sim = SimulatedPsu::new();
        let config = ServerConfig {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            accept_poll: MillisDurationU32::millis(10),
        };
        let server = Server::bind(&config, handler(&sim)).unwrap();
        let address = server.local_addr().unwrap();
        let stop = server.handle();
        let serving = std::thread::spawn(move || server.serve());

        let stream = TcpStream::connect(address).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();

        writer.write_all(b"OUTput ON\n").unwrap();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "DONE\n");

        reply.clear();
        writer.write_all(b"OUTput?\n").unwrap();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "ON\n");

        reply.clear();
        writer.write_all(b"VOLTage?\n").unwrap();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "5.000\n");

        reply.clear();
        writer.write_all(b"\n").unwrap();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "error: syntax error: empty request\n");

        reply.clear();
        writer.write_all(b"  \r\nMODel?\n").unwrap();
        reader.read_line(&mut reply).unwrap();
        assert!(reply.starts_with("error: "));
        reply.clear();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "3010\n");

        stop.stop();
        serving.join().unwrap().unwrap();
    }
}
