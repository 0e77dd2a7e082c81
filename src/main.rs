fn main() {
    skiff::shell::cli();
}
