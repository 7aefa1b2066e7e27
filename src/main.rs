fn main() {
    env_logger::init();
    portico::run(portico::AppConfig::new());
}
