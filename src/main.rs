#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    docgen_server::run().await
}
