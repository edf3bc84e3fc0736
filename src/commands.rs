pub mod serve {
    use std::future::IntoFuture as _;
    use std::sync::Arc;

    use tracing::info;

    use crate::facade::Facade;
    use crate::server::{self, Server};
    use crate::slave::NeaSmartHandler;
    use crate::store::RegisterStore;

    /// Run the Modbus slave and the HTTP API side by side over a shared register store.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        server: server::Args,

        /// Address to serve the HTTP API on.
        #[arg(long, default_value = "0.0.0.0:8080")]
        http_listen: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("modbus server failed")]
        Modbus(#[from] server::Error),
        #[error("could not listen for HTTP connections on `{1}`")]
        HttpBind(#[source] std::io::Error, String),
        #[error("HTTP server failed")]
        Http(#[source] std::io::Error),
        #[error("could not wait for the shutdown signal")]
        Signal(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(serve(args))
    }

    async fn serve(args: Args) -> Result<(), Error> {
        let store = Arc::new(RegisterStore::new());
        let handler = Arc::new(NeaSmartHandler::new(Arc::clone(&store), args.server.unit_id));
        let modbus = Server::bind(&args.server, handler).await?;
        let http_listener = tokio::net::TcpListener::bind(&args.http_listen)
            .await
            .map_err(|e| Error::HttpBind(e, args.http_listen.clone()))?;
        info!(
            message = "serving http",
            address = ?http_listener.local_addr().ok(),
            unit_id = args.server.unit_id
        );
        let app = crate::http::router(Facade::new(store));
        tokio::select! {
            result = modbus.run() => result?,
            result = axum::serve(http_listener, app).into_future() => result.map_err(Error::Http)?,
            result = tokio::signal::ctrl_c() => {
                result.map_err(Error::Signal)?;
                info!(message = "interrupted, shutting down");
            }
        }
        Ok(())
    }
}

pub mod registers {
    use crate::output::{self, Record};
    use crate::registers::{RegisterSchema, all_registers};

    /// Search and output the registers the gateway knows a meaning for.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list registers whose name, description or address contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the register list")]
        Output(#[from] output::Error),
    }

    impl Record for RegisterSchema {
        const HEADERS: &'static [&'static str] =
            &["Address", "Name", "Type", "Access", "Description"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.name.clone(),
                self.data_type.to_string(),
                self.access.to_string(),
                self.description.clone(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output()?;
        for register in all_registers() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.record(&register)?;
        }
        output.commit()?;
        Ok(())
    }

}
