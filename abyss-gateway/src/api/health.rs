pub async fn get_health() -> &'static str {
    "abyss-gateway is alive and healthy."
}
