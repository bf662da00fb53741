mod legalize;
