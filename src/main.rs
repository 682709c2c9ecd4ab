fn main() -> std::process::ExitCode {
    old_provisioner::run()
}
