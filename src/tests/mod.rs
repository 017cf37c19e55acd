mod test_equilibrium;
