fn main() {
    cinder::uci::run();
}
