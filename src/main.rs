use std::error::Error;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use dash_domain::RawEvent;
use loader::{DashboardLoader, LoaderConfig};

/// Harness de línea de comandos del cargador: lee un objeto JSON por línea
/// desde stdin (registros ya tokenizados por el proceso upstream) y los
/// entrega a la tubería.
///
/// Opciones soportadas:
///   --conn/-c <url>        connection string (o DASH_DB_URL/DATABASE_URL)
///   --batch                activa el modo de lotes
///   --perf                 activa los contadores de instrumentación
///   --flush-every <n>      umbral de flush por cantidad (defecto 1)
///   --flush-interval <s>   umbral de flush por tiempo en segundos (defecto 30)
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut conn: Option<String> = None;
    let mut config = LoaderConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--conn" | "-c" => conn = args.next(),
            "--batch" => config.batch = true,
            "--perf" => config.perf = true,
            "--flush-every" => {
                let v = args.next().ok_or("--flush-every requiere un valor")?;
                config.flush_every = v.parse()?;
            }
            "--flush-interval" => {
                let v = args.next().ok_or("--flush-interval requiere un valor")?;
                config.flush_interval = Duration::from_secs(v.parse()?);
            }
            other => return Err(format!("opción desconocida: {}", other).into()),
        }
    }

    // la conexión es obligatoria: sin ella el proceso no arranca (error
    // fatal de inicialización, no hay modo degradado)
    let repo = match conn {
        Some(url) => dash_persistence::DieselDashboardRepository::new(&url)?,
        None => dash_persistence::new_from_env()?,
    };
    let mut loader = DashboardLoader::new(Arc::new(repo), config);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                log::error!("unparseable input line: {}", e);
                continue;
            }
        };
        match RawEvent::from_json(&value) {
            Ok(raw) => loader.process(&raw),
            Err(e) => log::error!("invalid record: {}", e),
        }
    }

    loader.finish()?;
    Ok(())
}
