use serde::{Deserialize, Serialize};

use crate::detect::BuildSystem;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Install,
    Build,
    Test,
    Lint,
    Format,
    Clean,
}

/// Map a verb to a concrete argv for the given build system, or `None`
/// if that build system has no conventional command for this verb.
pub fn command_for(verb: Verb, build_system: BuildSystem) -> Option<Vec<String>> {
    use BuildSystem::*;
    use Verb::*;

    let argv: &[&str] = match (verb, build_system) {
        (Install, Cargo) => &["cargo", "fetch"],
        (Build, Cargo) => &["cargo", "build"],
        (Test, Cargo) => &["cargo", "test"],
        (Lint, Cargo) => &["cargo", "clippy", "--", "-D", "warnings"],
        (Format, Cargo) => &["cargo", "fmt"],
        (Clean, Cargo) => &["cargo", "clean"],

        (Install, Npm) => &["npm", "install"],
        (Build, Npm) => &["npm", "run", "build"],
        (Test, Npm) => &["npm", "test"],
        (Lint, Npm) => &["npm", "run", "lint"],
        (Format, Npm) => &["npm", "run", "format"],
        (Clean, Npm) => &["npm", "run", "clean"],

        (Install, Yarn) => &["yarn", "install"],
        (Build, Yarn) => &["yarn", "build"],
        (Test, Yarn) => &["yarn", "test"],
        (Lint, Yarn) => &["yarn", "lint"],
        (Format, Yarn) => &["yarn", "format"],
        (Clean, Yarn) => &["yarn", "clean"],

        (Build, Webpack) => &["webpack", "--mode", "production"],
        (Build, Vite) => &["vite", "build"],

        (Install, Poetry) => &["poetry", "install"],
        (Build, Poetry) => &["poetry", "build"],
        (Test, Poetry) => &["poetry", "run", "pytest"],
        (Lint, Poetry) => &["poetry", "run", "ruff", "check", "."],
        (Format, Poetry) => &["poetry", "run", "black", "."],

        (Install, Setuptools) => &["pip", "install", "-e", "."],
        (Build, Setuptools) => &["python", "setup.py", "build"],
        (Test, Setuptools) => &["python", "-m", "pytest"],
        (Clean, Setuptools) => &["python", "setup.py", "clean"],

        (Build, Go) => &["go", "build", "./..."],
        (Test, Go) => &["go", "test", "./..."],
        (Lint, Go) => &["go", "vet", "./..."],
        (Format, Go) => &["gofmt", "-l", "."],
        (Clean, Go) => &["go", "clean"],

        (Install, Maven) => &["mvn", "dependency:resolve"],
        (Build, Maven) => &["mvn", "compile"],
        (Test, Maven) => &["mvn", "test"],
        (Clean, Maven) => &["mvn", "clean"],

        (Install, Gradle) => &["./gradlew", "dependencies"],
        (Build, Gradle) => &["./gradlew", "build"],
        (Test, Gradle) => &["./gradlew", "test"],
        (Clean, Gradle) => &["./gradlew", "clean"],

        (Build, Cmake) => &["cmake", "--build", "."],
        (Clean, Cmake) => &["cmake", "--build", ".", "--target", "clean"],

        (Build, Make) => &["make"],
        (Test, Make) => &["make", "test"],
        (Clean, Make) => &["make", "clean"],

        _ => return None,
    };
    Some(argv.iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cargo_build_maps_to_cargo_build() {
        assert_eq!(command_for(Verb::Build, BuildSystem::Cargo), Some(vec!["cargo".into(), "build".into()]));
    }

    #[test]
    fn generic_has_no_mapping() {
        assert_eq!(command_for(Verb::Build, BuildSystem::Generic), None);
    }

    #[test]
    fn make_clean_maps_correctly() {
        assert_eq!(command_for(Verb::Clean, BuildSystem::Make), Some(vec!["make".into(), "clean".into()]));
    }
}
