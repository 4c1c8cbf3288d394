use anyhow::Context;
use fleet_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, listen: Option<&str>) -> anyhow::Result<()> {
    let mut config = Config::load(root)?;
    if let Some(addr) = listen {
        config.listen = addr.to_string();
    }

    let rt = tokio::runtime::Runtime::new()?;
    let root = root.to_path_buf();
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("cannot listen on {}", config.listen))?;
        println!("fleet console → http://{}", listener.local_addr()?);
        fleet_server::serve_on(&root, &config, listener).await
    })
}
